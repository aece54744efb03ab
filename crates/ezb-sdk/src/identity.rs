//! Proxy identity, handles and EJB metadata
//!
//! Every client proxy is identified by the factory it talks to, the interface
//! it exposes, the container holding the factory and, for stateful beans, the
//! session id. The identity string `factory_interface/container[@id]` backs
//! the locally answered `equals`, `hashCode` and `toString`.

use serde::{Deserialize, Serialize};

use crate::value::{ObjectValue, Value};

/// Class name of handle values
pub const HANDLE_CLASS: &str = "javax.ejb.Handle";

/// Class name of metadata values
pub const METADATA_CLASS: &str = "javax.ejb.EJBMetaData";

/// Who a proxy talks to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyIdentity {
    /// Container id
    pub container_id: String,
    /// Factory (bean) name
    pub factory_name: String,
    /// Exposed interface
    pub interface_name: String,
    /// Session id for stateful beans
    pub bean_id: Option<i64>,
}

impl ProxyIdentity {
    /// Create an identity without bean id
    pub fn new(
        container_id: impl Into<String>,
        factory_name: impl Into<String>,
        interface_name: impl Into<String>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            factory_name: factory_name.into(),
            interface_name: interface_name.into(),
            bean_id: None,
        }
    }

    /// Set the bean id
    pub fn with_bean_id(mut self, bean_id: Option<i64>) -> Self {
        self.bean_id = bean_id;
        self
    }

    /// `factory_interface/container[@id]`
    pub fn identity_string(&self) -> String {
        let mut out = format!(
            "{}_{}/{}",
            self.factory_name, self.interface_name, self.container_id
        );
        if let Some(id) = self.bean_id {
            out.push('@');
            out.push_str(&id.to_string());
        }
        out
    }

    /// Java-style string hash of the identity string
    pub fn identity_hash(&self) -> i32 {
        self.identity_string()
            .encode_utf16()
            .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
    }

    /// Whether `other` designates the same bean
    ///
    /// Stateful identities additionally compare the session id.
    pub fn is_identical(&self, other: &ProxyIdentity, stateful: bool) -> bool {
        self.factory_name == other.factory_name
            && self.container_id == other.container_id
            && (!stateful || self.bean_id == other.bean_id)
    }

    /// Encode as a handle value
    pub fn to_value(&self) -> Value {
        let bean_id = match self.bean_id {
            Some(id) => Value::Long(id),
            None => Value::Null,
        };
        Value::Object(
            ObjectValue::new(HANDLE_CLASS)
                .with_field("containerId", self.container_id.as_str())
                .with_field("factoryName", self.factory_name.as_str())
                .with_field("interfaceName", self.interface_name.as_str())
                .with_field("beanId", bean_id),
        )
    }

    /// Decode from a handle value
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.class_name != HANDLE_CLASS {
            return None;
        }
        let text = |name: &str| object.field(name).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            container_id: text("containerId")?,
            factory_name: text("factoryName")?,
            interface_name: text("interfaceName")?,
            bean_id: object.field("beanId").and_then(Value::as_i64),
        })
    }

    /// Whether `value` is a handle
    pub fn is_handle(value: &Value) -> bool {
        Self::from_value(value).is_some()
    }
}

/// EJB 2.1 `getEJBMetaData` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EjbMetaData {
    /// Home interface name
    pub home_interface: String,
    /// Component (remote or local) interface name
    pub remote_interface: String,
    /// Whether the bean is stateless
    pub stateless: bool,
}

impl EjbMetaData {
    /// Create metadata
    pub fn new(
        home_interface: impl Into<String>,
        remote_interface: impl Into<String>,
        stateless: bool,
    ) -> Self {
        Self {
            home_interface: home_interface.into(),
            remote_interface: remote_interface.into(),
            stateless,
        }
    }

    /// Encode as a value
    pub fn to_value(&self) -> Value {
        Value::Object(
            ObjectValue::new(METADATA_CLASS)
                .with_field("homeInterface", self.home_interface.as_str())
                .with_field("remoteInterface", self.remote_interface.as_str())
                .with_field("session", true)
                .with_field("statelessSession", self.stateless),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_string() {
        let id = ProxyIdentity::new("c1", "CartBean", "org.acme.Cart");
        assert_eq!(id.identity_string(), "CartBean_org.acme.Cart/c1");
        let id = id.with_bean_id(Some(4));
        assert_eq!(id.identity_string(), "CartBean_org.acme.Cart/c1@4");
    }

    #[test]
    fn test_handle_value_decodes() {
        let id = ProxyIdentity::new("c1", "CartBean", "org.acme.Cart").with_bean_id(Some(9));
        let value = id.to_value();
        assert!(ProxyIdentity::is_handle(&value));
        assert_eq!(ProxyIdentity::from_value(&value), Some(id));
        assert!(!ProxyIdentity::is_handle(&Value::from("nope")));
    }

    #[test]
    fn test_is_identical_for_stateful_compares_ids() {
        let a = ProxyIdentity::new("c1", "CartBean", "org.acme.Cart").with_bean_id(Some(1));
        let b = a.clone().with_bean_id(Some(2));
        assert!(a.is_identical(&b, false));
        assert!(!a.is_identical(&b, true));
    }

    #[test]
    fn test_identity_hash_is_stable() {
        let a = ProxyIdentity::new("c1", "CartBean", "org.acme.Cart");
        assert_eq!(a.identity_hash(), a.clone().identity_hash());
    }
}
