//! Remote method declarations.
//!
//! An [`Operation`] records what the caller declared about a method slot.
//! Binding validates it once and produces an immutable [`MethodDescriptor`].

use crate::error::BindError;
use crate::naming::NamingConvention;
use crate::tags::{parse_duration, parse_tag_settings, StructTag};
use reqwest::Method;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How a bound method reaches the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    #[default]
    JsonRpc2,
    Rest,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::JsonRpc2 => "jsonrpc2",
            TransportKind::Rest => "rest",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "jsonrpc2" => Ok(TransportKind::JsonRpc2),
            "rest" => Ok(TransportKind::Rest),
            _ => Err(()),
        }
    }
}

/// How the call argument is packed into JSON-RPC params.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParamShape {
    /// `[]` or `[arg]`.
    #[default]
    Array,
    /// The argument itself, which must serialize to an object.
    Object,
}

impl FromStr for ParamShape {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "array" => Ok(ParamShape::Array),
            "object" => Ok(ParamShape::Object),
            _ => Err(()),
        }
    }
}

/// Result caching policy of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheControl {
    pub enabled: bool,
    pub key: String,
    pub ttl: Duration,
}

impl CacheControl {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            key: String::new(),
            ttl: Self::DEFAULT_TTL,
        }
    }

    /// Parses `key:<k>,ttl:<duration>` settings. Both are optional.
    ///
    /// `key:-name` keys the cache by method name; without a key the cache
    /// is keyed by `<VERB>:<name>`.
    fn parse(slot: &str, settings: &str, verb: &Method, name: &str) -> Result<Self, BindError> {
        let invalid = |reason: String| BindError::InvalidCache {
            slot: slot.to_string(),
            reason,
        };
        let settings = parse_tag_settings(settings, ",");

        if let Some(unknown) = settings.keys().find(|k| *k != "key" && *k != "ttl") {
            return Err(invalid(format!("unknown setting {:?}", unknown)));
        }

        let key = match settings.get("key").map(|k| k.trim()) {
            Some("-name") => name.to_string(),
            Some(k) if !k.is_empty() => k.to_string(),
            _ => format!("{}:{}", verb, name),
        };
        let ttl = match settings.get("ttl") {
            Some(ttl) => parse_duration(ttl).map_err(|e| invalid(e.to_string()))?,
            None => Self::DEFAULT_TTL,
        };

        Ok(Self {
            enabled: true,
            key,
            ttl,
        })
    }
}

/// Declaration of one remote method slot.
#[derive(Debug, Clone, Default)]
pub struct Operation {
    slot: String,
    name: Option<String>,
    transport: Option<String>,
    verb: Option<String>,
    container: Option<String>,
    cache: Option<String>,
}

impl Operation {
    /// Declares a slot with default settings: JSON-RPC 2.0, array params,
    /// no caching, name derived from the slot.
    pub fn new(slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            ..Self::default()
        }
    }

    /// Declares a slot from tag syntax, e.g.
    /// `rpc:"rest" method:"POST" name:"echo" container:"object" cache:"ttl:1s"`.
    ///
    /// Keys other than `rpc`, `name`, `method`, `container` and `cache` are
    /// ignored.
    pub fn from_tags(slot: impl Into<String>, tags: &str) -> Result<Self, BindError> {
        let slot = slot.into();
        let tag = StructTag::parse(tags).map_err(|source| BindError::MalformedTag {
            slot: slot.clone(),
            source,
        })?;
        let owned = |key: &str| tag.get(key).map(str::to_string);
        Ok(Self {
            name: owned("name"),
            transport: owned("rpc"),
            verb: owned("method"),
            container: owned("container"),
            cache: owned("cache"),
            slot,
        })
    }

    /// Remote name, used as given.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn rest(mut self) -> Self {
        self.transport = Some(TransportKind::Rest.as_str().to_string());
        self
    }

    pub fn jsonrpc2(mut self) -> Self {
        self.transport = Some(TransportKind::JsonRpc2.as_str().to_string());
        self
    }

    /// HTTP verb for REST calls. Also part of the default cache key.
    pub fn verb(mut self, verb: impl Into<String>) -> Self {
        self.verb = Some(verb.into());
        self
    }

    /// Param container, `array` or `object`.
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Enables caching with `key:<k>,ttl:<duration>` settings (may be empty).
    pub fn cache(mut self, settings: impl Into<String>) -> Self {
        self.cache = Some(settings.into());
        self
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }
}

/// A validated, immutable method description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub slot: String,
    /// Name sent on the wire, namespace prefix included.
    pub name: String,
    pub transport: TransportKind,
    pub verb: Method,
    pub shape: ParamShape,
    pub cache: CacheControl,
}

impl MethodDescriptor {
    /// Resolves `op` with the client's naming convention and name prefix.
    pub fn resolve(
        op: &Operation,
        naming: NamingConvention,
        prefix: &str,
    ) -> Result<Self, BindError> {
        let slot = op.slot.trim();
        if slot.is_empty() {
            return Err(BindError::EmptySlot);
        }

        let base = match &op.name {
            Some(name) => name.trim().to_string(),
            None => naming.apply(slot),
        };
        if base.is_empty() {
            return Err(BindError::EmptyName(slot.to_string()));
        }
        let name = format!("{}{}", prefix, base);

        let transport = match &op.transport {
            Some(value) => value.parse().map_err(|_| BindError::UnknownTransport {
                slot: slot.to_string(),
                value: value.clone(),
            })?,
            None => TransportKind::default(),
        };

        let verb = match &op.verb {
            Some(verb) => {
                let normalized = verb.trim().to_ascii_uppercase();
                Method::from_bytes(normalized.as_bytes()).map_err(|_| BindError::InvalidVerb {
                    slot: slot.to_string(),
                    verb: verb.clone(),
                })?
            }
            None => Method::GET,
        };

        let shape = match &op.container {
            Some(value) => value.parse().map_err(|_| BindError::UnknownContainer {
                slot: slot.to_string(),
                value: value.clone(),
            })?,
            None => ParamShape::default(),
        };

        let cache = match &op.cache {
            Some(settings) => CacheControl::parse(slot, settings, &verb, &name)?,
            None => CacheControl::disabled(),
        };

        Ok(Self {
            slot: slot.to_string(),
            name,
            transport,
            verb,
            shape,
            cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(op: Operation) -> Result<MethodDescriptor, BindError> {
        MethodDescriptor::resolve(&op, NamingConvention::Original, "")
    }

    #[test]
    fn test_defaults() {
        let d = resolve(Operation::new("GetBlock")).unwrap();
        assert_eq!(d.name, "GetBlock");
        assert_eq!(d.transport, TransportKind::JsonRpc2);
        assert_eq!(d.verb, Method::GET);
        assert_eq!(d.shape, ParamShape::Array);
        assert!(!d.cache.enabled);
    }

    #[test]
    fn test_name_derivation() {
        let op = Operation::new("GetBlockCount");
        let d = MethodDescriptor::resolve(&op, NamingConvention::CamelCase, "chain.").unwrap();
        assert_eq!(d.name, "chain.getBlockCount");

        let d = MethodDescriptor::resolve(&op, NamingConvention::SnakeCase, "").unwrap();
        assert_eq!(d.name, "get_block_count");

        // An explicit name skips the convention but keeps the prefix.
        let op = Operation::new("GetBlockCount").name("getblockcount");
        let d = MethodDescriptor::resolve(&op, NamingConvention::PascalCase, "btc_").unwrap();
        assert_eq!(d.name, "btc_getblockcount");
    }

    #[test]
    fn test_verb_normalized() {
        let d = resolve(Operation::new("Echo").rest().verb(" post ")).unwrap();
        assert_eq!(d.verb, Method::POST);
        assert_eq!(d.transport, TransportKind::Rest);

        assert!(matches!(
            resolve(Operation::new("Echo").verb("")),
            Err(BindError::InvalidVerb { .. })
        ));
        assert!(matches!(
            resolve(Operation::new("Echo").verb("GE T")),
            Err(BindError::InvalidVerb { .. })
        ));
    }

    #[test]
    fn test_cache_keys() {
        let d = resolve(Operation::new("Height").cache("")).unwrap();
        assert!(d.cache.enabled);
        assert_eq!(d.cache.key, "GET:Height");
        assert_eq!(d.cache.ttl, CacheControl::DEFAULT_TTL);

        let d = resolve(Operation::new("Height").cache("key:-name,ttl:500ms")).unwrap();
        assert_eq!(d.cache.key, "Height");
        assert_eq!(d.cache.ttl, Duration::from_millis(500));

        let d = resolve(Operation::new("Height").verb("post").cache("key:tip")).unwrap();
        assert_eq!(d.cache.key, "tip");

        let d = resolve(Operation::new("Height").verb("post").cache("ttl:2s")).unwrap();
        assert_eq!(d.cache.key, "POST:Height");
    }

    #[test]
    fn test_bind_errors() {
        assert!(matches!(resolve(Operation::new("  ")), Err(BindError::EmptySlot)));
        assert!(matches!(
            resolve(Operation::new("A").name("")),
            Err(BindError::EmptyName(_))
        ));
        assert!(matches!(
            resolve(Operation::new("A").container("tuple")),
            Err(BindError::UnknownContainer { .. })
        ));
        assert!(matches!(
            resolve(Operation::from_tags("A", r#"rpc:"grpc""#).unwrap()),
            Err(BindError::UnknownTransport { .. })
        ));
        assert!(matches!(
            resolve(Operation::new("A").cache("ttl:soon")),
            Err(BindError::InvalidCache { .. })
        ));
        assert!(matches!(
            resolve(Operation::new("A").cache("size:10")),
            Err(BindError::InvalidCache { .. })
        ));
    }

    #[test]
    fn test_from_tags() {
        let op = Operation::from_tags(
            "Echo",
            r#"rpc:"rest" method:"POST" name:"echo" container:"object" cache:"key:k,ttl:1s" json:"-""#,
        )
        .unwrap();
        let d = resolve(op).unwrap();
        assert_eq!(d.slot, "Echo");
        assert_eq!(d.name, "echo");
        assert_eq!(d.transport, TransportKind::Rest);
        assert_eq!(d.verb, Method::POST);
        assert_eq!(d.shape, ParamShape::Object);
        assert_eq!(d.cache.key, "k");
        assert_eq!(d.cache.ttl, Duration::from_secs(1));

        assert!(matches!(
            Operation::from_tags("Echo", r#"rpc:rest"#),
            Err(BindError::MalformedTag { .. })
        ));
    }
}
