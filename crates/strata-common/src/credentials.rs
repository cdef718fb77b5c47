//! Database user credentials and the secrets that carry them
//!
//! Every cluster gets two secrets: the default-user secret, which is the source of
//! truth for the bootstrap user, and an internal mirror that status points at.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use rand::Rng;
use zeroize::Zeroizing;

use crate::crd::DatabaseCluster;
use crate::kube_utils::{managed_labels, owner_reference};

/// Secret key holding the username
pub const USERNAME_KEY: &str = "username";

/// Secret key holding the password
pub const PASSWORD_KEY: &str = "password";

/// Username of the generated bootstrap user
pub const DEFAULT_USERNAME: &str = "admin";

/// Length of generated passwords
pub const PASSWORD_LENGTH: usize = 32;

/// Name of the default-user secret for a cluster
pub fn default_user_secret_name(cluster: &str) -> String {
    format!("{cluster}-default-user")
}

/// Name of the internal credential secret referenced by status
pub fn credential_secret_name(cluster: &str) -> String {
    format!("{cluster}-credentials")
}

/// Username/password pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Database username
    pub username: String,
    /// Database password, wiped on drop
    pub password: Zeroizing<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Create credentials from parts
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Generate the bootstrap user with a random alphanumeric password
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let password: String = (0..PASSWORD_LENGTH)
            .map(|_| {
                let idx = rng.gen_range(0..62);
                match idx {
                    0..=9 => (b'0' + idx) as char,
                    10..=35 => (b'a' + idx - 10) as char,
                    _ => (b'A' + idx - 36) as char,
                }
            })
            .collect();
        Self::new(DEFAULT_USERNAME, password)
    }

    /// Read credentials from a secret's `data` or `stringData`
    ///
    /// Returns `None` when either key is missing or not valid UTF-8.
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let read = |key: &str| -> Option<String> {
            if let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) {
                return String::from_utf8(value.0.clone()).ok();
            }
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .cloned()
        };
        Some(Self {
            username: read(USERNAME_KEY)?,
            password: Zeroizing::new(read(PASSWORD_KEY)?),
        })
    }

    /// Secret `stringData` for these credentials
    pub fn string_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (USERNAME_KEY.to_string(), self.username.clone()),
            (PASSWORD_KEY.to_string(), self.password.to_string()),
        ])
    }

    /// Build a secret owned by `cluster` carrying these credentials
    pub fn to_secret(&self, cluster: &DatabaseCluster, name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: cluster.namespace(),
                labels: Some(managed_labels(&cluster.name_any())),
                owner_references: owner_reference(cluster).map(|r| vec![r]),
                ..Default::default()
            },
            string_data: Some(self.string_data()),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }
}
