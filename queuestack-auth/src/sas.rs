//! Shared access signature generation and verification

use base64::Engine;
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use queuestack_core::QueueError;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::operation::QueueOperation;
use crate::permissions::{AccountPermissions, QueuePermissions, ResourceTypes};
use crate::policy::PolicyLookup;

type HmacSha256 = Hmac<Sha256>;

/// Signed version stamped on every token
pub const SAS_VERSION: &str = "2017-04-17";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Signed-services value for the queue service
const QUEUE_SERVICE: &str = "q";

/// Errors while parsing or verifying a token
#[derive(Debug, Error)]
pub enum SasError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unsupported signed version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid permission letter: {0:?}")]
    InvalidPermission(char),

    #[error("Invalid account key")]
    InvalidKey,

    #[error("Signature mismatch")]
    SignatureMismatch,

    #[error("Token is not valid before {0}")]
    NotYetValid(DateTime<Utc>),

    #[error("Token expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("Token has no expiry")]
    MissingExpiry,

    #[error("Signed identifier not found: {0}")]
    UnknownIdentifier(String),

    #[error("Field {0} is set by both the token and the stored policy")]
    ConflictingField(&'static str),

    #[error("Token does not grant {0}")]
    PermissionDenied(QueueOperation),

    #[error("{0} cannot be performed with a queue token")]
    OperationNotPermitted(QueueOperation),
}

impl From<SasError> for QueueError {
    fn from(error: SasError) -> Self {
        QueueError::AccessDenied(error.to_string())
    }
}

/// Account key used to sign tokens
#[derive(Clone)]
pub struct SharedKey(Vec<u8>);

impl SharedKey {
    pub fn from_base64(encoded: &str) -> Result<Self, SasError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| SasError::InvalidKey)?;
        if bytes.is_empty() {
            return Err(SasError::InvalidKey);
        }
        Ok(Self(bytes))
    }

    /// Random 64-byte key
    pub fn generate() -> Self {
        let bytes = (0..4)
            .flat_map(|_| *uuid::Uuid::new_v4().as_bytes())
            .collect();
        Self(bytes)
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.0)
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// What a token is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SasScope {
    /// One queue; fields may be deferred to a stored policy via `identifier`
    Queue {
        identifier: Option<String>,
        permission: Option<QueuePermissions>,
    },
    /// The whole account
    Account {
        resource_types: ResourceTypes,
        permission: AccountPermissions,
    },
}

/// A parsed shared access signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasToken {
    pub version: String,
    pub start: Option<DateTime<Utc>>,
    pub expiry: Option<DateTime<Utc>>,
    pub scope: SasScope,
    pub signature: String,
}

impl SasToken {
    fn string_to_sign(&self, account: &str, queue: Option<&str>) -> String {
        let start = self.start.map(format_time).unwrap_or_default();
        let expiry = self.expiry.map(format_time).unwrap_or_default();

        match &self.scope {
            SasScope::Queue {
                identifier,
                permission,
            } => format!(
                "{}\n{}\n{}\n/queue/{}/{}\n{}\n{}",
                permission.map(|p| p.to_letters()).unwrap_or_default(),
                start,
                expiry,
                account,
                queue.unwrap_or_default(),
                identifier.as_deref().unwrap_or_default(),
                self.version
            ),
            SasScope::Account {
                resource_types,
                permission,
            } => format!(
                "{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
                account,
                permission.to_letters(),
                QUEUE_SERVICE,
                resource_types.to_letters(),
                start,
                expiry,
                self.version
            ),
        }
    }
}

impl fmt::Display for SasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("sv", &self.version);

        if let SasScope::Account {
            resource_types,
            permission,
        } = &self.scope
        {
            query.append_pair("ss", QUEUE_SERVICE);
            query.append_pair("srt", &resource_types.to_letters());
            query.append_pair("sp", &permission.to_letters());
        }
        if let Some(start) = self.start {
            query.append_pair("st", &format_time(start));
        }
        if let Some(expiry) = self.expiry {
            query.append_pair("se", &format_time(expiry));
        }
        if let SasScope::Queue {
            identifier,
            permission,
        } = &self.scope
        {
            if let Some(permission) = permission {
                query.append_pair("sp", &permission.to_letters());
            }
            if let Some(identifier) = identifier {
                query.append_pair("si", identifier);
            }
        }
        query.append_pair("sig", &self.signature);

        f.write_str(&query.finish())
    }
}

impl FromStr for SasToken {
    type Err = SasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields: HashMap<String, String> = HashMap::new();
        for (key, value) in form_urlencoded::parse(s.trim_start_matches('?').as_bytes()) {
            let key = key.into_owned();
            if fields.contains_key(&key) {
                return Err(SasError::MalformedToken(format!("duplicate field {}", key)));
            }
            fields.insert(key, value.into_owned());
        }

        let version = fields
            .remove("sv")
            .ok_or_else(|| SasError::MalformedToken("missing sv".into()))?;
        let signature = fields
            .remove("sig")
            .ok_or_else(|| SasError::MalformedToken("missing sig".into()))?;
        let start = fields.remove("st").map(|v| parse_time(&v)).transpose()?;
        let expiry = fields.remove("se").map(|v| parse_time(&v)).transpose()?;

        let scope = if let Some(services) = fields.remove("ss") {
            if services != QUEUE_SERVICE {
                return Err(SasError::MalformedToken(format!(
                    "unsupported signed services {}",
                    services
                )));
            }
            let resource_types = fields
                .remove("srt")
                .ok_or_else(|| SasError::MalformedToken("missing srt".into()))?
                .parse()?;
            let permission = fields
                .remove("sp")
                .ok_or_else(|| SasError::MalformedToken("missing sp".into()))?
                .parse()?;
            SasScope::Account {
                resource_types,
                permission,
            }
        } else {
            SasScope::Queue {
                identifier: fields.remove("si"),
                permission: fields.remove("sp").map(|p| p.parse()).transpose()?,
            }
        };

        if let Some(unknown) = fields.keys().next() {
            return Err(SasError::MalformedToken(format!("unexpected field {}", unknown)));
        }

        Ok(Self {
            version,
            start,
            expiry,
            scope,
            signature,
        })
    }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, SasError> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|_| SasError::MalformedToken(format!("invalid timestamp {}", value)))
}

/// Issues tokens with the account key and checks presented tokens
pub struct AccessController {
    account: String,
    key: SharedKey,
}

impl AccessController {
    pub fn new(account: impl Into<String>, key: SharedKey) -> Self {
        Self {
            account: account.into(),
            key,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Self-contained token for one queue
    pub fn generate_queue_token(
        &self,
        queue: &str,
        permission: QueuePermissions,
        expiry: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
    ) -> SasToken {
        let scope = SasScope::Queue {
            identifier: None,
            permission: Some(permission),
        };
        self.sign_token(Some(queue), scope, start, Some(expiry))
    }

    /// Token that takes its grant from the queue's stored policy `identifier`
    pub fn generate_identifier_token(&self, queue: &str, identifier: &str) -> SasToken {
        let scope = SasScope::Queue {
            identifier: Some(identifier.to_string()),
            permission: None,
        };
        self.sign_token(Some(queue), scope, None, None)
    }

    /// Token over every queue in the account
    pub fn generate_account_token(
        &self,
        resource_types: ResourceTypes,
        permission: AccountPermissions,
        expiry: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
    ) -> SasToken {
        let scope = SasScope::Account {
            resource_types,
            permission,
        };
        self.sign_token(None, scope, start, Some(expiry))
    }

    fn sign_token(
        &self,
        queue: Option<&str>,
        scope: SasScope,
        start: Option<DateTime<Utc>>,
        expiry: Option<DateTime<Utc>>,
    ) -> SasToken {
        let mut token = SasToken {
            version: SAS_VERSION.to_string(),
            start: start.map(|t| t.trunc_subsecs(0)),
            expiry: expiry.map(|t| t.trunc_subsecs(0)),
            scope,
            signature: String::new(),
        };
        let mac = self.mac(&token.string_to_sign(&self.account, queue));
        token.signature =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        token
    }

    fn mac(&self, string_to_sign: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.key.0).expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        mac
    }

    fn verify_signature(&self, token: &SasToken, queue: Option<&str>) -> Result<(), SasError> {
        let provided = base64::engine::general_purpose::STANDARD
            .decode(&token.signature)
            .map_err(|_| SasError::SignatureMismatch)?;
        self.mac(&token.string_to_sign(&self.account, queue))
            .verify_slice(&provided)
            .map_err(|_| SasError::SignatureMismatch)
    }

    /// Decide whether `token` may perform `operation` on `queue` at `now`.
    ///
    /// `queue` is `None` for service-level operations. Identifier tokens are
    /// resolved against the policies currently stored on the queue, so
    /// removing a policy revokes every token that references it.
    pub fn authorize(
        &self,
        token: &SasToken,
        queue: Option<&str>,
        operation: QueueOperation,
        now: DateTime<Utc>,
        policies: &dyn PolicyLookup,
    ) -> Result<(), SasError> {
        let result = self.check(token, queue, operation, now, policies);
        match &result {
            Ok(()) => debug!(operation = %operation, queue = queue.unwrap_or("-"), "Token accepted"),
            Err(e) => warn!(
                operation = %operation,
                queue = queue.unwrap_or("-"),
                error = %e,
                "Token rejected"
            ),
        }
        result
    }

    fn check(
        &self,
        token: &SasToken,
        queue: Option<&str>,
        operation: QueueOperation,
        now: DateTime<Utc>,
        policies: &dyn PolicyLookup,
    ) -> Result<(), SasError> {
        if token.version != SAS_VERSION {
            return Err(SasError::UnsupportedVersion(token.version.clone()));
        }

        match &token.scope {
            SasScope::Queue {
                identifier,
                permission,
            } => {
                let queue = queue.ok_or(SasError::OperationNotPermitted(operation))?;
                let required = operation
                    .queue_permission()
                    .ok_or(SasError::OperationNotPermitted(operation))?;
                self.verify_signature(token, Some(queue))?;

                let (start, expiry, permission) = match identifier {
                    Some(id) => {
                        let policy = policies
                            .access_policy(queue, id)
                            .ok_or_else(|| SasError::UnknownIdentifier(id.clone()))?;
                        (
                            merge("st", token.start, policy.start)?,
                            merge("se", token.expiry, policy.expiry)?,
                            merge("sp", *permission, policy.permission)?,
                        )
                    }
                    None => (token.start, token.expiry, *permission),
                };

                check_window(start, expiry, now)?;
                if !permission
                    .unwrap_or(QueuePermissions::empty())
                    .contains(required)
                {
                    return Err(SasError::PermissionDenied(operation));
                }
            }
            SasScope::Account {
                resource_types,
                permission,
            } => {
                self.verify_signature(token, None)?;
                check_window(token.start, token.expiry, now)?;

                let (resource, required) = operation.account_requirement();
                if !resource_types.contains(resource) || !permission.contains(required) {
                    return Err(SasError::PermissionDenied(operation));
                }
            }
        }

        Ok(())
    }
}

fn merge<T>(field: &'static str, token: Option<T>, policy: Option<T>) -> Result<Option<T>, SasError> {
    match (token, policy) {
        (Some(_), Some(_)) => Err(SasError::ConflictingField(field)),
        (token, policy) => Ok(token.or(policy)),
    }
}

fn check_window(
    start: Option<DateTime<Utc>>,
    expiry: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), SasError> {
    if let Some(start) = start {
        if now < start {
            return Err(SasError::NotYetValid(start));
        }
    }
    let expiry = expiry.ok_or(SasError::MissingExpiry)?;
    if now >= expiry {
        return Err(SasError::Expired(expiry));
    }
    Ok(())
}
