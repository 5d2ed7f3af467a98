// Core data structures for the lookout engine

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::scheduler::SmartGenerator;

/// Highest item hash level (full content)
pub const MAX_HASH_LEVEL: u8 = 5;

/// SHA-256 digest used as a content address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, `None` unless it is exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    /// Digest of arbitrary bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex representation
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Length-prefixed field hasher, so `("ab", "c")` and `("a", "bc")` differ
struct FieldHasher(Sha256);

impl FieldHasher {
    fn new(domain: &str) -> Self {
        let mut hasher = Self(Sha256::new());
        hasher.field(domain.as_bytes());
        hasher
    }

    fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    fn str(&mut self, value: &str) -> &mut Self {
        self.field(value.as_bytes())
    }

    fn opt_str(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(v) => self.field(&[1]).str(v),
            None => self.field(&[0]),
        }
    }

    fn f64(&mut self, value: f64) -> &mut Self {
        self.field(&value.to_bits().to_le_bytes())
    }

    fn finish(self) -> ContentHash {
        ContentHash(self.0.finalize().into())
    }
}

// ============================================================================
// Timing
// ============================================================================

/// When a catalog or target should run next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Timing {
    /// Repeat every `interval` seconds
    Interval { interval: f64 },
    /// Run once at a fixed timestamp
    Scheduled { timestamp: f64 },
    /// Adaptive polling converging on the generator's anchor
    Smart {
        generator: SmartGenerator,
        #[serde(default)]
        expired: bool,
    },
}

impl Timing {
    /// Fixed repeat period
    pub fn interval(secs: f64) -> Self {
        Self::Interval { interval: secs }
    }

    /// One fixed future timestamp
    pub fn scheduled(timestamp: f64) -> Self {
        Self::Scheduled { timestamp }
    }

    /// Adaptive schedule backed by a generator
    pub fn smart(generator: SmartGenerator) -> Self {
        Self::Smart {
            generator,
            expired: false,
        }
    }

    /// Variant name, used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Interval { .. } => "interval",
            Self::Scheduled { .. } => "scheduled",
            Self::Smart { .. } => "smart",
        }
    }

    /// Whether a smart timing has exhausted its adaptive window
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Smart { expired: true, .. })
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Refresh of a plugin's list of interesting items
///
/// Two catalogs are equal when they belong to the same plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub script: String,
    pub timing: Timing,
}

impl Catalog {
    /// Create a catalog for `script`
    pub fn new(script: impl Into<String>, timing: Timing) -> Self {
        Self {
            script: script.into(),
            timing,
        }
    }

    /// Content address: digest of the owning plugin name
    pub fn hash(&self) -> ContentHash {
        let mut hasher = FieldHasher::new("catalog");
        hasher.str(&self.script);
        hasher.finish()
    }
}

impl PartialEq for Catalog {
    fn eq(&self, other: &Self) -> bool {
        self.script == other.script
    }
}

impl Eq for Catalog {}

// ============================================================================
// Target
// ============================================================================

/// What a target checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Subject {
    /// A specific page or product, by name
    Page { name: String },
    /// Follow-up monitoring of an already released item
    Restock { item_id: i64 },
}

impl Subject {
    fn discriminator(&self) -> String {
        match self {
            Self::Page { name } => format!("page:{name}"),
            Self::Restock { item_id } => format!("restock:{item_id}"),
        }
    }
}

/// Re-check of one specific item or page
///
/// Equality is by content hash (script, subject and payload), never by timing
/// or reuse counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub script: String,
    pub subject: Subject,
    pub timing: Timing,
    /// Opaque plugin payload
    #[serde(default)]
    pub data: serde_json::Value,
    /// Number of consecutive re-queues, bounds priority escalation
    #[serde(default)]
    pub reuse: u32,
}

impl Target {
    /// Target for a named page
    pub fn page(script: impl Into<String>, name: impl Into<String>, timing: Timing) -> Self {
        Self {
            script: script.into(),
            subject: Subject::Page { name: name.into() },
            timing,
            data: serde_json::Value::Null,
            reuse: 0,
        }
    }

    /// Restock target for a released item
    pub fn restock(script: impl Into<String>, item_id: i64, timing: Timing) -> Self {
        Self {
            script: script.into(),
            subject: Subject::Restock { item_id },
            timing,
            data: serde_json::Value::Null,
            reuse: 0,
        }
    }

    /// Attach an opaque payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Whether this is a restock target
    pub fn is_restock(&self) -> bool {
        matches!(self.subject, Subject::Restock { .. })
    }

    /// Content address: digest of script, payload and subject discriminator
    pub fn hash(&self) -> ContentHash {
        let payload = serde_json::to_vec(&self.data).unwrap_or_default();
        let mut hasher = FieldHasher::new("target");
        hasher
            .str(&self.script)
            .field(&payload)
            .str(&self.subject.discriminator());
        hasher.finish()
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.script == other.script && self.subject == other.subject && self.data == other.data
    }
}

impl Eq for Target {}

// ============================================================================
// Items
// ============================================================================

/// Price attached to an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub current: f64,
    pub old: Option<f64>,
    pub currency: String,
}

/// Purchasable size/variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub label: String,
    pub url: Option<String>,
}

impl Size {
    /// Size without a dedicated link
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: None,
        }
    }
}

/// Lifecycle stage of a discovered item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ItemKind {
    /// Seen but not yet actionable
    Announce,
    /// Newly actionable, optionally scheduling its own follow-up
    Release { restock: Option<Target> },
    /// Update to a previously released item
    Restock { id: i64 },
}

impl ItemKind {
    /// Stage name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Announce => "announce",
            Self::Release { .. } => "release",
            Self::Restock { .. } => "restock",
        }
    }
}

/// Discovered unit of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub script: String,
    pub url: String,
    pub name: String,
    /// Stable item id assigned by the plugin, required for restocks
    pub id: Option<i64>,
    pub price: Option<Price>,
    pub sizes: Vec<Size>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub kind: ItemKind,
}

impl Item {
    fn with_kind(
        script: impl Into<String>,
        url: impl Into<String>,
        name: impl Into<String>,
        kind: ItemKind,
    ) -> Self {
        Self {
            script: script.into(),
            url: url.into(),
            name: name.into(),
            id: None,
            price: None,
            sizes: Vec::new(),
            description: None,
            image: None,
            fields: BTreeMap::new(),
            kind,
        }
    }

    /// Announced item
    pub fn announce(
        script: impl Into<String>,
        url: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::with_kind(script, url, name, ItemKind::Announce)
    }

    /// Released item
    pub fn release(
        script: impl Into<String>,
        url: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::with_kind(script, url, name, ItemKind::Release { restock: None })
    }

    /// Restock of the released item `id`
    pub fn restock(
        script: impl Into<String>,
        url: impl Into<String>,
        name: impl Into<String>,
        id: i64,
    ) -> Self {
        let mut item = Self::with_kind(script, url, name, ItemKind::Restock { id });
        item.id = Some(id);
        item
    }

    /// Set the plugin-assigned id
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the price
    pub fn with_price(mut self, current: f64, currency: impl Into<String>) -> Self {
        self.price = Some(Price {
            current,
            old: None,
            currency: currency.into(),
        });
        self
    }

    /// Add a size
    pub fn with_size(mut self, size: Size) -> Self {
        self.sizes.push(size);
        self
    }

    /// Add a free-form field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Attach a restock target to a release; no-op for other stages
    pub fn with_restock_target(mut self, target: Target) -> Self {
        if let ItemKind::Release { restock } = &mut self.kind {
            *restock = Some(target);
        }
        self
    }

    /// Content address at `level` (0 = identity only, 5 = full content)
    pub fn hash(&self, level: u8) -> ContentHash {
        let level = level.min(MAX_HASH_LEVEL);
        let mut hasher = FieldHasher::new("item");
        hasher.str(&self.script).str(&self.url);

        if level >= 1 {
            hasher.str(&self.name);
        }
        if level >= 2 {
            match &self.price {
                Some(price) => {
                    hasher.f64(price.current).str(&price.currency);
                    hasher.field(&[u8::from(price.old.is_some())]);
                    if let Some(old) = price.old {
                        hasher.f64(old);
                    }
                }
                None => {
                    hasher.field(&[]);
                }
            }
        }
        if level >= 3 {
            hasher.field(&(self.sizes.len() as u64).to_le_bytes());
            for size in &self.sizes {
                hasher.str(&size.label).opt_str(size.url.as_deref());
            }
        }
        if level >= 4 {
            hasher
                .opt_str(self.description.as_deref())
                .opt_str(self.image.as_deref());
        }
        if level >= 5 {
            for (key, value) in &self.fields {
                hasher.str(key).str(value);
            }
        }
        hasher.finish()
    }
}

// ============================================================================
// Target End
// ============================================================================

/// Terminal outcome of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetEndKind {
    Fail,
    SoldOut,
    Success,
}

impl TargetEndKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::SoldOut => "sold_out",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for TargetEndKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal record for a target, notified at most once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEnd {
    pub target: Target,
    pub kind: TargetEndKind,
    pub description: Option<String>,
}

impl TargetEnd {
    /// Create a terminal record
    pub fn new(target: Target, kind: TargetEndKind) -> Self {
        Self {
            target,
            kind,
            description: None,
        }
    }

    /// Content address, shared with the target
    pub fn hash(&self) -> ContentHash {
        self.target.hash()
    }
}

/// Free-text message from a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub script: String,
    pub text: String,
}

impl Message {
    /// Create a message
    pub fn new(script: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            text: text.into(),
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Which queue a task came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMode {
    Catalog = 0,
    Target = 1,
}

impl ExecuteMode {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Target => "target",
        }
    }
}

impl fmt::Display for ExecuteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work handed to a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Task {
    Catalog(Catalog),
    Target(Target),
}

impl Task {
    /// Owning plugin
    pub fn script(&self) -> &str {
        match self {
            Self::Catalog(c) => &c.script,
            Self::Target(t) => &t.script,
        }
    }

    /// Execution mode matching the task type
    pub fn mode(&self) -> ExecuteMode {
        match self {
            Self::Catalog(_) => ExecuteMode::Catalog,
            Self::Target(_) => ExecuteMode::Target,
        }
    }
}

/// One object returned by a plugin execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParseResult {
    Catalog(Catalog),
    Target(Target),
    Item(Item),
    TargetEnd(TargetEnd),
    Message(Message),
}

impl From<Catalog> for ParseResult {
    fn from(value: Catalog) -> Self {
        Self::Catalog(value)
    }
}

impl From<Target> for ParseResult {
    fn from(value: Target) -> Self {
        Self::Target(value)
    }
}

impl From<Item> for ParseResult {
    fn from(value: Item) -> Self {
        Self::Item(value)
    }
}

impl From<TargetEnd> for ParseResult {
    fn from(value: TargetEnd) -> Self {
        Self::TargetEnd(value)
    }
}

impl From<Message> for ParseResult {
    fn from(value: Message) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_catalog_equality_by_script() {
        let a = Catalog::new("shop", Timing::interval(5.0));
        let b = Catalog::new("shop", Timing::scheduled(100.0));
        let c = Catalog::new("other", Timing::interval(5.0));

        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a, c);
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_target_equality_ignores_timing_and_reuse() {
        let a = Target::page("shop", "sneaker", Timing::interval(5.0)).with_data(json!({"sku": 1}));
        let mut b = Target::page("shop", "sneaker", Timing::scheduled(9.0)).with_data(json!({"sku": 1}));
        b.reuse = 4;

        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_target_hash_depends_on_payload_and_family() {
        let page = Target::page("shop", "1", Timing::interval(5.0));
        let other_payload = page.clone().with_data(json!({"sku": 2}));
        let restock = Target::restock("shop", 1, Timing::interval(5.0));

        assert_ne!(page.hash(), other_payload.hash());
        assert_ne!(page.hash(), restock.hash());
        assert!(restock.is_restock());
    }

    #[test]
    fn test_item_hash_levels() {
        let base = Item::announce("shop", "https://shop.example/p/1", "Runner");
        let renamed = Item {
            name: "Runner v2".to_string(),
            ..base.clone()
        };
        let repriced = base.clone().with_price(120.0, "EUR");
        let with_field = base.clone().with_field("colour", "red");

        // identity only
        assert_eq!(base.hash(0), renamed.hash(0));
        // name participates from level 1
        assert_ne!(base.hash(1), renamed.hash(1));
        // price participates from level 2
        assert_eq!(base.hash(1), repriced.hash(1));
        assert_ne!(base.hash(2), repriced.hash(2));
        // free-form fields only at full content
        assert_eq!(base.hash(4), with_field.hash(4));
        assert_ne!(base.hash(5), with_field.hash(5));
    }

    #[test]
    fn test_item_hash_level_is_clamped() {
        let item = Item::announce("shop", "u", "n").with_field("k", "v");
        assert_eq!(item.hash(9), item.hash(MAX_HASH_LEVEL));
    }

    #[test]
    fn test_release_restock_target() {
        let target = Target::restock("shop", 7, Timing::interval(60.0));
        let release = Item::release("shop", "u", "n")
            .with_id(7)
            .with_restock_target(target.clone());

        assert_eq!(
            release.kind,
            ItemKind::Release {
                restock: Some(target)
            }
        );
        assert_eq!(release.id, Some(7));
    }

    #[test]
    fn test_target_end_hash_matches_target() {
        let target = Target::page("shop", "p", Timing::interval(1.0));
        let end = TargetEnd::new(target.clone(), TargetEndKind::SoldOut);
        assert_eq!(end.hash(), target.hash());
        assert_eq!(end.kind.to_string(), "sold_out");
    }

    #[test]
    fn test_content_hash_hex() {
        let hash = ContentHash::of(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(ContentHash::from_slice(hash.as_bytes()), Some(hash));
        assert_eq!(ContentHash::from_slice(&[0u8; 4]), None);
    }
}
