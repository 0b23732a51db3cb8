//! JSON representations exchanged with the CSE
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::FlexContainerRecord;
use crate::resource::ResourceKind;

/// Upper bound for request and response bodies
pub const MAX_BODY_SIZE: usize = 2048;

/// Response status code reported when acknowledging a notification (OK)
pub const ACK_STATUS_CODE: u16 = 2004;

/// Container definition of the intersection FlexContainer
pub const INTERSECTION_DEFINITION: &str = "edu.psu.cse.traffic.trafficLightIntersection";

/// Resource name of the intersection FlexContainer
pub const INTERSECTION_NAME: &str = "intersection";

/// App-ID registered by the Application entity
pub const APP_ID: &str = "NtrafficAPI";

/// All operations allowed (create, retrieve, update, delete, notify, discover)
const ACCESS_ALL: u8 = 63;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encoded body is {0} bytes, above the {MAX_BODY_SIZE} bytes limit")]
    Oversized(usize),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed body: {0}")]
    Malformed(String),

    #[error("missing or invalid field '{0}'")]
    FieldMissing(String),

    #[error("body is {0} bytes, above the {MAX_BODY_SIZE} bytes limit")]
    Oversized(usize),
}

/// Wrap `payload` in the envelope of `kind`
pub fn encode<T: Serialize>(kind: ResourceKind, payload: &T) -> Result<Vec<u8>, EncodeError> {
    encode_envelope(kind.envelope(), payload)
}

/// Wrap `payload` as `{"<key>": payload}`
pub fn encode_envelope<T: Serialize>(key: &str, payload: &T) -> Result<Vec<u8>, EncodeError> {
    let mut envelope = Map::new();
    envelope.insert(key.to_owned(), serde_json::to_value(payload)?);
    let body = serde_json::to_vec(&envelope)?;
    if body.len() > MAX_BODY_SIZE {
        return Err(EncodeError::Oversized(body.len()));
    }
    Ok(body)
}

/// Parse a response body into a JSON object
pub fn decode(body: &[u8]) -> Result<Fields, DecodeError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(DecodeError::Oversized(body.len()));
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(Fields(map)),
        Ok(_) => Err(DecodeError::Malformed("not a JSON object".to_owned())),
        Err(e) => Err(DecodeError::Malformed(e.to_string())),
    }
}

/// A decoded JSON object with typed accessors
#[derive(Debug, Clone, PartialEq)]
pub struct Fields(Map<String, Value>);

impl Fields {
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn object(&self, name: &str) -> Result<Fields, DecodeError> {
        match self.0.get(name) {
            Some(Value::Object(map)) => Ok(Fields(map.clone())),
            _ => Err(DecodeError::FieldMissing(name.to_owned())),
        }
    }

    pub fn string(&self, name: &str) -> Result<&str, DecodeError> {
        self.get_string(name)
            .ok_or_else(|| DecodeError::FieldMissing(name.to_owned()))
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn array(&self, name: &str) -> Result<&Vec<Value>, DecodeError> {
        self.0
            .get(name)
            .and_then(Value::as_array)
            .ok_or_else(|| DecodeError::FieldMissing(name.to_owned()))
    }

    /// Follow a chain of nested objects
    pub fn path(&self, names: &[&str]) -> Result<Fields, DecodeError> {
        let mut current = self.clone();
        for name in names {
            current = current.object(name)?;
        }
        Ok(current)
    }

    /// Deserialize the whole object into `T`
    pub fn parse<T: serde::de::DeserializeOwned>(self) -> Result<T, DecodeError> {
        serde_json::from_value(Value::Object(self.0))
            .map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

/// Identifier of the first entry of a discovery result (`m2m:uril`).
///
/// Entries are structured paths like `id-in/cacp123`; the identifier is the
/// last segment. Returns `None` if the list is empty.
pub fn first_discovered(fields: &Fields) -> Result<Option<String>, DecodeError> {
    let uril = fields.array("m2m:uril")?;
    let Some(first) = uril.first() else {
        return Ok(None);
    };
    let path = first
        .as_str()
        .ok_or_else(|| DecodeError::FieldMissing("m2m:uril".to_owned()))?;
    let id = path.rsplit('/').next().unwrap_or(path);
    if id.is_empty() {
        return Err(DecodeError::FieldMissing("m2m:uril".to_owned()));
    }
    Ok(Some(id.to_owned()))
}

/// Server-assigned identifier from a creation response
pub fn created_identifier(kind: ResourceKind, fields: &Fields) -> Result<String, DecodeError> {
    let resource = fields.object(kind.envelope())?;
    resource.string(kind.id_field()).map(str::to_owned)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessControlRule {
    pub acor: Vec<String>,
    pub acop: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Privileges {
    pub acr: Vec<AccessControlRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPolicyPayload {
    pub rn: String,
    pub pv: Privileges,
    pub pvs: Privileges,
}

impl AccessPolicyPayload {
    /// Policy granting full access to the device and the dashboard
    pub fn new(originator: &str, dashboard: &str) -> Self {
        let privileges = Privileges {
            acr: vec![
                AccessControlRule {
                    acor: vec![dashboard.to_owned()],
                    acop: ACCESS_ALL,
                },
                AccessControlRule {
                    acor: vec![originator.to_owned()],
                    acop: ACCESS_ALL,
                },
            ],
        };
        Self {
            rn: access_policy_name(originator),
            pv: privileges.clone(),
            pvs: privileges,
        }
    }
}

pub fn access_policy_name(originator: &str) -> String {
    format!("{originator}-ACP")
}

pub fn subscription_name(originator: &str) -> String {
    format!("{originator}SUB")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationPayload {
    pub acpi: Vec<String>,
    pub api: String,
    pub rn: String,
    pub srv: Vec<String>,
    pub rr: bool,
}

impl ApplicationPayload {
    pub fn new(acpi: &str, name: &str) -> Self {
        Self {
            acpi: vec![acpi.to_owned()],
            api: APP_ID.to_owned(),
            rn: name.to_owned(),
            srv: vec!["3".to_owned()],
            rr: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlexContainerPayload {
    pub acpi: Vec<String>,
    pub cnd: String,
    pub rn: String,
    #[serde(flatten)]
    pub record: FlexContainerRecord,
}

impl FlexContainerPayload {
    pub fn new(acpi: &str, record: FlexContainerRecord) -> Self {
        Self {
            acpi: vec![acpi.to_owned()],
            cnd: INTERSECTION_DEFINITION.to_owned(),
            rn: INTERSECTION_NAME.to_owned(),
            record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventCriteria {
    /// Notification event types, 1 is "update of resource"
    pub net: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionPayload {
    pub acpi: Vec<String>,
    pub nu: Vec<String>,
    pub rn: String,
    /// Notification content type, 1 is "all attributes"
    pub nct: u8,
    pub enc: EventCriteria,
}

impl SubscriptionPayload {
    /// Subscription to container updates, notified to the originator itself
    pub fn new(acpi: &str, originator: &str) -> Self {
        Self {
            acpi: vec![acpi.to_owned()],
            nu: vec![originator.to_owned()],
            rn: subscription_name(originator),
            nct: 1,
            enc: EventCriteria { net: vec![1] },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollingChannelPayload {}

/// Response primitive acknowledging a notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Acknowledgement {
    pub rqi: String,
    /// Content of the notification, echoed back verbatim
    pub pc: Value,
    pub rsc: u16,
    pub rvi: String,
}

impl Acknowledgement {
    pub const ENVELOPE: &'static str = "m2m:rsp";

    pub fn new(request_id: &str, content: Value) -> Self {
        Self {
            rqi: request_id.to_owned(),
            pc: content,
            rsc: ACK_STATUS_CODE,
            rvi: "3".to_owned(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode_envelope(Self::ENVELOPE, self)
    }
}
