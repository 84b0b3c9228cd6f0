//! Service queries and service specs.
//!
//! A [`ServiceQuery`] describes the *kind* of service an application is
//! looking for. A [`ServiceSpec`] embeds a query and adds everything needed to
//! actually talk to (or host) one concrete service: port, address,
//! advertisement policy and transport parameters.
//!
//! Both are validated once, when constructed, and are immutable afterwards
//! except for the address fields assigned by the service directory.

use crate::error::SpecError;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

/// Default DNS-SD domain.
pub const DEFAULT_DOMAIN: &str = "local.";

/// Where a query or spec description comes from.
///
/// Exactly one form is accepted per parse call.
#[derive(Debug, Clone)]
pub enum SpecSource<'a> {
    /// Path to a JSON file
    Path(&'a Path),
    /// Raw JSON text
    Json(&'a str),
    /// Already-parsed structured value
    Value(Value),
}

impl<'a> SpecSource<'a> {
    /// Treats `s` as a file path if such a file exists, otherwise as raw JSON.
    pub fn guess(s: &'a str) -> Self {
        let path = Path::new(s);
        if path.is_file() {
            SpecSource::Path(path)
        } else {
            SpecSource::Json(s)
        }
    }

    fn into_object(self) -> Result<Map<String, Value>, SpecError> {
        let value = match self {
            SpecSource::Path(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    SpecError::malformed(format!("cannot read {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&contents).map_err(|e| {
                    SpecError::malformed(format!("invalid JSON in {}: {}", path.display(), e))
                })?
            }
            SpecSource::Json(raw) => serde_json::from_str(raw).map_err(|e| {
                SpecError::malformed(format!("not a valid JSON file path or string: {}", e))
            })?,
            SpecSource::Value(value) => value,
        };

        match value {
            Value::Object(map) => Ok(map),
            other => Err(SpecError::malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl From<Value> for SpecSource<'static> {
    fn from(value: Value) -> Self {
        SpecSource::Value(value)
    }
}

/// Service type: selects the communication plugin (`name`) and the DNS-SD
/// service type that is browsed or registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceType {
    /// Plugin family, e.g. `zmqreqrep` or `echo`
    pub name: String,
    /// Transport protocol label, usually `tcp` or `udp`
    pub protocol: String,
    /// At most one DNS-SD subtype
    #[serde(
        rename = "subtypes",
        serialize_with = "serialize_subtype",
        skip_serializing_if = "Option::is_none"
    )]
    pub subtype: Option<String>,
}

impl ServiceType {
    /// Creates a service type without subtype.
    pub fn new(name: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into(),
            subtype: None,
        }
    }

    /// Sets the subtype.
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// DNS-SD type string in the default domain, e.g. `_echo._tcp.local.`
    pub fn to_service_string(&self) -> String {
        self.to_service_string_in(DEFAULT_DOMAIN)
    }

    /// DNS-SD type string in `domain`, including the subtype label if any
    /// (`_<sub>._sub._<name>._<protocol>.<domain>`).
    pub fn to_service_string_in(&self, domain: &str) -> String {
        let base = self.base_service_string_in(domain);
        match &self.subtype {
            Some(sub) => format!("_{}._sub.{}", sub, base),
            None => base,
        }
    }

    /// DNS-SD type string without the subtype label.
    pub fn base_service_string_in(&self, domain: &str) -> String {
        let domain = domain.trim_start_matches('.');
        if domain.ends_with('.') {
            format!("_{}._{}.{}", self.name, self.protocol, domain)
        } else {
            format!("_{}._{}.{}.", self.name, self.protocol, domain)
        }
    }

    fn from_value(value: Option<&Value>) -> Result<Self, SpecError> {
        let obj = value.and_then(Value::as_object).ok_or_else(|| {
            SpecError::schema("must specify service type; type.name; and type.protocol")
        })?;

        let name = required_str(obj.get("name"), "type.name")?;
        let protocol = required_str(obj.get("protocol"), "type.protocol")?;

        let subtype = match non_null(obj.get("subtypes")) {
            None => None,
            Some(Value::Array(items)) => {
                if items.len() > 1 {
                    return Err(SpecError::TooManySubtypes { count: items.len() });
                }
                match items.first() {
                    None => None,
                    Some(Value::String(sub)) if !sub.is_empty() => Some(sub.clone()),
                    Some(_) => {
                        return Err(SpecError::schema("subtypes must be non-empty strings"))
                    }
                }
            }
            Some(_) => {
                return Err(SpecError::schema(
                    "subtypes of a service type must be in an array",
                ))
            }
        };

        Ok(Self {
            name,
            protocol,
            subtype,
        })
    }
}

fn serialize_subtype<S: Serializer>(subtype: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    let list: Vec<&String> = subtype.iter().collect();
    list.serialize(serializer)
}

/// Describes the kind of service a client is looking for.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceQuery {
    #[serde(rename = "type")]
    service_type: ServiceType,

    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<HashMap<String, String>>,

    #[serde(skip)]
    name_pattern: Option<Regex>,
}

impl PartialEq for ServiceQuery {
    fn eq(&self, other: &Self) -> bool {
        self.service_type == other.service_type
            && self.name == other.name
            && self.properties == other.properties
    }
}

impl ServiceQuery {
    /// Creates a query that matches every service of `service_type`.
    pub fn new(service_type: ServiceType) -> Self {
        Self {
            service_type,
            name: None,
            properties: None,
            name_pattern: None,
        }
    }

    /// Restricts the query by name (literal or regular expression).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name_pattern = compile_name_pattern(&name);
        self.name = Some(name);
        self
    }

    /// Adds a property to match.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Parses and validates a query.
    ///
    /// # Errors
    ///
    /// Fails with [`SpecError::QueryCarriesConnectionInfo`] when the source
    /// contains `address` or `port`, plus every error the shared fields can
    /// raise.
    pub fn parse(source: SpecSource<'_>) -> Result<Self, SpecError> {
        let obj = source.into_object()?;

        if non_null(obj.get("address")).is_some() || non_null(obj.get("port")).is_some() {
            return Err(SpecError::QueryCarriesConnectionInfo);
        }

        Self::from_object(&obj)
    }

    /// Parses a query from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        Self::parse(SpecSource::Path(path.as_ref()))
    }

    /// Parses a query from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, SpecError> {
        Self::parse(SpecSource::Json(raw))
    }

    fn from_object(obj: &Map<String, Value>) -> Result<Self, SpecError> {
        let service_type = ServiceType::from_value(obj.get("type"))?;

        let name = match non_null(obj.get("name")) {
            None => None,
            Some(Value::String(name)) if name.is_empty() => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => {
                return Err(SpecError::schema(
                    "must specify service name as a non-empty string",
                ))
            }
        };

        // 'properties' comes from hand-written descriptions, 'txtRecord' from raw
        // discovery records.
        let properties = match (non_null(obj.get("properties")), non_null(obj.get("txtRecord"))) {
            (Some(_), Some(_)) => return Err(SpecError::ConflictingFields),
            (Some(value), None) | (None, Some(value)) => Some(parse_properties(value)?),
            (None, None) => None,
        };

        let name_pattern = name.as_deref().and_then(compile_name_pattern);

        Ok(Self {
            service_type,
            name,
            properties,
            name_pattern,
        })
    }

    /// Service type.
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    /// Name or name pattern, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Properties, if any.
    pub fn properties(&self) -> Option<&HashMap<String, String>> {
        self.properties.as_ref()
    }

    /// Checks an advertised name and property set against this query.
    ///
    /// The type is assumed to match already (records come from browsing this
    /// query's type). A record matches when the query has neither name nor
    /// properties, OR the name pattern matches, OR at least one query property
    /// has an identical advertised value.
    pub fn matches(&self, name: Option<&str>, properties: &HashMap<String, String>) -> bool {
        if let (Some(pattern), Some(name)) = (&self.name_pattern, name) {
            if pattern.is_match(name) {
                return true;
            }
        }

        if let Some(wanted) = &self.properties {
            let any = wanted
                .iter()
                .any(|(key, value)| properties.get(key).is_some_and(|v| v == value));
            if any {
                return true;
            }
        }

        self.name.is_none() && self.properties.is_none()
    }
}

impl TryFrom<Value> for ServiceQuery {
    type Error = SpecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::parse(SpecSource::Value(value))
    }
}

/// How a service wants to be advertised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertise {
    /// Advertise on the local network
    pub locally: bool,
    /// Advertise through a cloud service
    pub cloud: bool,
}

/// Full description of a concrete service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSpec {
    #[serde(flatten)]
    query: ServiceQuery,

    port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,

    #[serde(rename = "otherAddresses", skip_serializing_if = "Vec::is_empty")]
    other_addresses: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    advertise: Option<Advertise>,

    #[serde(rename = "typeParams", skip_serializing_if = "Option::is_none")]
    type_params: Option<Map<String, Value>>,
}

impl ServiceSpec {
    /// Starts building a spec programmatically.
    pub fn builder(service_type: ServiceType) -> ServiceSpecBuilder {
        ServiceSpecBuilder::new(service_type)
    }

    /// Parses and validates a spec.
    pub fn parse(source: SpecSource<'_>) -> Result<Self, SpecError> {
        let obj = source.into_object()?;
        Self::from_object(&obj)
    }

    /// Parses a spec from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        Self::parse(SpecSource::Path(path.as_ref()))
    }

    /// Parses a spec from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, SpecError> {
        Self::parse(SpecSource::Json(raw))
    }

    /// Builds the spec handed to applications for a discovered service.
    ///
    /// `addresses` is the ranked output of the address filter; the first one
    /// becomes the connection address.
    pub fn from_discovery(
        service_type: ServiceType,
        name: &str,
        port: u16,
        properties: HashMap<String, String>,
        addresses: Vec<String>,
    ) -> Result<Self, SpecError> {
        if port == 0 {
            return Err(SpecError::port("discovered service advertised port 0"));
        }

        let mut query = ServiceQuery::new(service_type).with_name(name);
        if !properties.is_empty() {
            query.properties = Some(properties);
        }

        let spec = Self {
            query,
            port,
            address: addresses.first().cloned(),
            other_addresses: addresses,
            advertise: None,
            type_params: None,
        };
        spec.check_name()?;
        Ok(spec)
    }

    fn from_object(obj: &Map<String, Value>) -> Result<Self, SpecError> {
        let query = ServiceQuery::from_object(obj)?;
        let port = parse_port(obj.get("port"))?;

        let address = match non_null(obj.get("address")) {
            None => None,
            Some(Value::String(address)) if address.is_empty() => None,
            Some(Value::String(address)) => Some(address.clone()),
            Some(_) => return Err(SpecError::InvalidAddressType),
        };

        let other_addresses = match non_null(obj.get("otherAddresses")) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or(SpecError::InvalidAddressType)
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(SpecError::schema(
                    "otherAddresses must be an array of addresses",
                ))
            }
        };

        let address = address.or_else(|| other_addresses.first().cloned());
        let advertise = parse_advertise(obj.get("advertise"))?;

        let type_params = match non_null(obj.get("typeParams").or_else(|| obj.get("type_params"))) {
            None => None,
            Some(Value::Object(params)) => Some(params.clone()),
            Some(_) => {
                return Err(SpecError::schema(
                    "typeParams must be an object containing name/value pairs",
                ))
            }
        };

        let spec = Self {
            query,
            port,
            address,
            other_addresses,
            advertise,
            type_params,
        };
        spec.check_name()?;
        Ok(spec)
    }

    fn check_name(&self) -> Result<(), SpecError> {
        let may_be_advertised = match self.advertise {
            None => self.address.is_none(),
            Some(advertise) => advertise.locally,
        };

        if may_be_advertised && self.query.name.is_none() {
            return Err(SpecError::MissingName);
        }
        Ok(())
    }

    /// The embedded query part.
    pub fn query(&self) -> &ServiceQuery {
        &self.query
    }

    /// Service type.
    pub fn service_type(&self) -> &ServiceType {
        &self.query.service_type
    }

    /// Service name.
    pub fn name(&self) -> Option<&str> {
        self.query.name()
    }

    /// Advertised properties.
    pub fn properties(&self) -> Option<&HashMap<String, String>> {
        self.query.properties()
    }

    /// Service port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connection address, if known.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// All ranked addresses supplied by discovery.
    pub fn other_addresses(&self) -> &[String] {
        &self.other_addresses
    }

    /// Advertisement policy as written in the source, if any.
    pub fn advertise(&self) -> Option<Advertise> {
        self.advertise
    }

    /// Whether the service should be advertised on the local network.
    /// Defaults to `true` when no policy was given.
    pub fn advertise_locally(&self) -> bool {
        self.advertise.map_or(true, |a| a.locally)
    }

    /// Whether the service asked for cloud advertisement.
    pub fn advertise_cloud(&self) -> bool {
        self.advertise.is_some_and(|a| a.cloud)
    }

    /// Opaque transport parameters.
    pub fn type_params(&self) -> Option<&Map<String, Value>> {
        self.type_params.as_ref()
    }

    /// Looks up a single transport parameter.
    pub fn type_param(&self, key: &str) -> Option<&Value> {
        self.type_params.as_ref().and_then(|params| params.get(key))
    }

    /// A spec with both address and port can be connected to without discovery.
    pub fn is_direct(&self) -> bool {
        self.address.is_some()
    }
}

impl TryFrom<Value> for ServiceSpec {
    type Error = SpecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::parse(SpecSource::Value(value))
    }
}

/// Builder for [`ServiceSpec`].
#[derive(Debug, Clone)]
pub struct ServiceSpecBuilder {
    query: ServiceQuery,
    port: Option<u16>,
    address: Option<String>,
    advertise: Option<Advertise>,
    type_params: Option<Map<String, Value>>,
}

impl ServiceSpecBuilder {
    fn new(service_type: ServiceType) -> Self {
        Self {
            query: ServiceQuery::new(service_type),
            port: None,
            address: None,
            advertise: None,
            type_params: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.query = self.query.with_name(name);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query = self.query.with_property(key, value);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn advertise(mut self, locally: bool, cloud: bool) -> Self {
        self.advertise = Some(Advertise { locally, cloud });
        self
    }

    pub fn type_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.type_params
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Validates and builds the spec.
    pub fn build(self) -> Result<ServiceSpec, SpecError> {
        let port = match self.port {
            None => return Err(SpecError::MissingPort),
            Some(0) => return Err(SpecError::port("port cannot be 0")),
            Some(port) => port,
        };

        let spec = ServiceSpec {
            query: self.query,
            port,
            address: self.address,
            other_addresses: Vec::new(),
            advertise: self.advertise,
            type_params: self.type_params,
        };
        spec.check_name()?;
        Ok(spec)
    }
}

fn compile_name_pattern(name: &str) -> Option<Regex> {
    // Names that are not valid patterns are matched literally.
    Regex::new(name)
        .or_else(|_| Regex::new(&regex::escape(name)))
        .ok()
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn required_str(value: Option<&Value>, field: &str) -> Result<String, SpecError> {
    match non_null(value) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | None => Err(SpecError::schema(format!(
            "must specify service type; {} is missing",
            field
        ))),
        Some(other) => Err(SpecError::schema(format!(
            "{} must be a string, got {}",
            field,
            json_kind(other)
        ))),
    }
}

fn parse_properties(value: &Value) -> Result<HashMap<String, String>, SpecError> {
    let obj = value.as_object().ok_or_else(|| {
        SpecError::schema("must specify service properties as an object containing name/value pairs")
    })?;

    obj.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(SpecError::schema(format!(
                        "property '{}' must be a string, got {}",
                        key,
                        json_kind(other)
                    )))
                }
            };
            Ok((key.clone(), value))
        })
        .collect()
}

fn parse_port(value: Option<&Value>) -> Result<u16, SpecError> {
    match non_null(value) {
        None => Err(SpecError::MissingPort),
        Some(Value::Number(n)) => {
            let port = n
                .as_u64()
                .ok_or_else(|| SpecError::port(format!("{} is not a valid port", n)))?;
            match u16::try_from(port) {
                Ok(0) => Err(SpecError::port("port cannot be 0")),
                Ok(port) => Ok(port),
                Err(_) => Err(SpecError::port(format!("{} is out of range", port))),
            }
        }
        Some(other) => Err(SpecError::port(format!(
            "must specify service port as a number, got {}",
            json_kind(other)
        ))),
    }
}

fn parse_advertise(value: Option<&Value>) -> Result<Option<Advertise>, SpecError> {
    let obj = match non_null(value) {
        None => return Ok(None),
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(SpecError::schema("advertise must be an object")),
    };

    let flag = |name: &str| -> Result<bool, SpecError> {
        match non_null(obj.get(name)) {
            None => Err(SpecError::MissingAdvertiseFlag {
                flag: name.to_string(),
            }),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(SpecError::schema(format!(
                "advertise.{} must be a boolean",
                name
            ))),
        }
    };

    Ok(Some(Advertise {
        locally: flag("locally")?,
        cloud: flag("cloud")?,
    }))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_valid_query() {
        let query = ServiceQuery::from_json(
            r#"{"type": {"name": "zmqpubsub", "protocol": "tcp"}, "name": "^/my/temperature"}"#,
        )
        .unwrap();

        assert_eq!(query.service_type().name, "zmqpubsub");
        assert_eq!(query.service_type().protocol, "tcp");
        assert_eq!(query.name(), Some("^/my/temperature"));
        assert!(query.properties().is_none());
    }

    #[test]
    fn test_query_rejects_connection_info() {
        let bases = [
            json!({"type": {"name": "echo", "protocol": "tcp"}}),
            json!({"type": {"name": "echo", "protocol": "tcp"}, "name": "svc"}),
            json!({"type": {"name": "echo", "protocol": "tcp"}, "properties": {"k": "v"}}),
        ];

        for base in bases {
            let mut with_both = base.clone();
            with_both["address"] = json!("10.0.0.1");
            with_both["port"] = json!(9999);
            assert_eq!(
                ServiceQuery::try_from(with_both),
                Err(SpecError::QueryCarriesConnectionInfo)
            );

            let mut with_port = base;
            with_port["port"] = json!(9999);
            assert_eq!(
                ServiceQuery::try_from(with_port),
                Err(SpecError::QueryCarriesConnectionInfo)
            );
        }
    }

    #[test]
    fn test_missing_type_fields() {
        let err = ServiceQuery::try_from(json!({"type": {"name": "echo"}})).unwrap_err();
        assert!(matches!(err, SpecError::InvalidSchema { .. }));

        let err = ServiceQuery::try_from(json!({"name": "svc"})).unwrap_err();
        assert!(matches!(err, SpecError::InvalidSchema { .. }));
    }

    #[test]
    fn test_too_many_subtypes() {
        let err = ServiceQuery::try_from(json!({
            "type": {"name": "echo", "protocol": "tcp", "subtypes": ["a", "b"]}
        }))
        .unwrap_err();
        assert_eq!(err, SpecError::TooManySubtypes { count: 2 });
    }

    #[test]
    fn test_conflicting_properties() {
        let err = ServiceQuery::try_from(json!({
            "type": {"name": "echo", "protocol": "tcp"},
            "properties": {"a": "1"},
            "txtRecord": {"a": "1"}
        }))
        .unwrap_err();
        assert_eq!(err, SpecError::ConflictingFields);
    }

    #[test]
    fn test_txt_record_alias() {
        let query = ServiceQuery::try_from(json!({
            "type": {"name": "echo", "protocol": "tcp"},
            "txtRecord": {"room": "kitchen", "floor": 2}
        }))
        .unwrap();
        assert_eq!(
            query.properties(),
            Some(&props(&[("room", "kitchen"), ("floor", "2")]))
        );
    }

    #[test]
    fn test_malformed_input() {
        let err = ServiceQuery::from_json("{not json").unwrap_err();
        assert!(matches!(err, SpecError::MalformedInput { .. }));

        let err = ServiceQuery::try_from(json!(["array"])).unwrap_err();
        assert!(matches!(err, SpecError::MalformedInput { .. }));
    }

    #[test]
    fn test_query_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.json");
        std::fs::write(&path, r#"{"type": {"name": "echo", "protocol": "tcp"}}"#).unwrap();

        let query = ServiceQuery::from_file(&path).unwrap();
        assert_eq!(query.service_type().name, "echo");

        let guessed = ServiceQuery::parse(SpecSource::guess(path.to_str().unwrap())).unwrap();
        assert_eq!(guessed, query);
    }

    #[test]
    fn test_query_matching_is_or_combined() {
        let query = ServiceQuery::new(ServiceType::new("echo", "tcp"))
            .with_name("^temp")
            .with_property("room", "kitchen");

        // name matches, properties don't
        assert!(query.matches(Some("temperature"), &props(&[("room", "garage")])));
        // properties match, name doesn't
        assert!(query.matches(Some("humidity"), &props(&[("room", "kitchen")])));
        // neither
        assert!(!query.matches(Some("humidity"), &props(&[("room", "garage")])));
        assert!(!query.matches(None, &HashMap::new()));

        let type_only = ServiceQuery::new(ServiceType::new("echo", "tcp"));
        assert!(type_only.matches(Some("anything"), &HashMap::new()));
        assert!(type_only.matches(None, &HashMap::new()));
    }

    #[test]
    fn test_invalid_pattern_matches_literally() {
        let query = ServiceQuery::new(ServiceType::new("echo", "tcp")).with_name("svc(1");
        assert!(query.matches(Some("my svc(1"), &HashMap::new()));
        assert!(!query.matches(Some("svc1"), &HashMap::new()));
    }

    #[test]
    fn test_valid_spec() {
        let spec = ServiceSpec::from_json(
            r#"{
                "type": {"name": "echo", "protocol": "tcp"},
                "name": "svc1",
                "port": 9999,
                "properties": {"dataType": "float"},
                "advertise": {"locally": true, "cloud": false}
            }"#,
        )
        .unwrap();

        assert_eq!(spec.name(), Some("svc1"));
        assert_eq!(spec.port(), 9999);
        assert!(spec.address().is_none());
        assert!(spec.advertise_locally());
        assert!(!spec.advertise_cloud());
    }

    #[test]
    fn test_spec_port_errors() {
        let base = json!({"type": {"name": "echo", "protocol": "tcp"}, "name": "svc"});

        assert_eq!(
            ServiceSpec::try_from(base.clone()),
            Err(SpecError::MissingPort)
        );

        for bad in [json!("9999"), json!(0), json!(70000), json!(-1), json!(1.5)] {
            let mut value = base.clone();
            value["port"] = bad;
            let err = ServiceSpec::try_from(value).unwrap_err();
            assert!(matches!(err, SpecError::InvalidPort { .. }), "{err:?}");
        }
    }

    #[test]
    fn test_spec_address_type() {
        let err = ServiceSpec::try_from(json!({
            "type": {"name": "echo", "protocol": "tcp"},
            "port": 9999,
            "address": 10
        }))
        .unwrap_err();
        assert_eq!(err, SpecError::InvalidAddressType);
    }

    #[test]
    fn test_spec_partial_advertise() {
        let err = ServiceSpec::try_from(json!({
            "type": {"name": "echo", "protocol": "tcp"},
            "name": "svc",
            "port": 9999,
            "advertise": {"locally": true}
        }))
        .unwrap_err();
        assert_eq!(
            err,
            SpecError::MissingAdvertiseFlag {
                flag: "cloud".to_string()
            }
        );
    }

    #[test]
    fn test_spec_naming_rule() {
        // advertised by default, so a name is required
        let err = ServiceSpec::try_from(json!({
            "type": {"name": "echo", "protocol": "tcp"},
            "port": 9999
        }))
        .unwrap_err();
        assert_eq!(err, SpecError::MissingName);

        // direct connection needs no name
        let spec = ServiceSpec::try_from(json!({
            "type": {"name": "echo", "protocol": "tcp"},
            "port": 9999,
            "address": "127.0.0.1"
        }))
        .unwrap();
        assert!(spec.is_direct());

        // explicitly advertised locally needs a name even with an address
        let err = ServiceSpec::try_from(json!({
            "type": {"name": "echo", "protocol": "tcp"},
            "port": 9999,
            "address": "127.0.0.1",
            "advertise": {"locally": true, "cloud": false}
        }))
        .unwrap_err();
        assert_eq!(err, SpecError::MissingName);
    }

    #[test]
    fn test_other_addresses_fill_address() {
        let spec = ServiceSpec::try_from(json!({
            "type": {"name": "echo", "protocol": "tcp"},
            "name": "svc",
            "port": 9999,
            "otherAddresses": ["10.0.0.5", "10.0.0.6"]
        }))
        .unwrap();
        assert_eq!(spec.address(), Some("10.0.0.5"));
        assert_eq!(spec.other_addresses().len(), 2);
    }

    #[test]
    fn test_spec_round_trip() {
        let spec = ServiceSpec::builder(ServiceType::new("echo", "tcp").with_subtype("sensor"))
            .name("svc1")
            .port(9999)
            .address("192.168.1.20")
            .property("room", "kitchen")
            .advertise(true, false)
            .type_param("secure", true)
            .build()
            .unwrap();

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["type"]["subtypes"], json!(["sensor"]));
        assert_eq!(value["typeParams"]["secure"], json!(true));

        let parsed = ServiceSpec::try_from(value).unwrap();
        assert_eq!(parsed, spec);

        let discovered = ServiceSpec::from_discovery(
            ServiceType::new("echo", "tcp"),
            "svc2",
            4000,
            props(&[("room", "garage")]),
            vec!["10.0.0.5".to_string(), "10.0.0.9".to_string()],
        )
        .unwrap();
        let parsed = ServiceSpec::try_from(serde_json::to_value(&discovered).unwrap()).unwrap();
        assert_eq!(parsed, discovered);
        assert_eq!(parsed.address(), Some("10.0.0.5"));
    }

    #[test]
    fn test_service_strings() {
        let plain = ServiceType::new("echo", "tcp");
        assert_eq!(plain.to_service_string(), "_echo._tcp.local.");

        let sub = ServiceType::new("echo", "tcp").with_subtype("printer");
        assert_eq!(sub.to_service_string(), "_printer._sub._echo._tcp.local.");
        assert_eq!(sub.base_service_string_in("local"), "_echo._tcp.local.");
    }
}
