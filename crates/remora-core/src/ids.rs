//! Branded ID newtypes.
//!
//! Sessions, transport connections, remote objects and event subscriptions
//! are all addressed by opaque strings on the wire. Each gets its own newtype
//! so an object reference can never be passed where a session id is expected.
//!
//! Fresh ids are UUID v7 (time-ordered); object references additionally carry
//! the class name as a suffix (`<uuid>_<Class>`), which keeps them unique per
//! registry and readable in logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Logical session identity, independent of any transport connection.
    SessionId
}

branded_id! {
    /// Identity of one physical transport connection (a WebSocket, an HTTP exchange).
    ConnectionId
}

branded_id! {
    /// Opaque reference naming one live object in an object registry.
    ObjectRef
}

branded_id! {
    /// Subscription handle returned by `subscribe`, required by `unsubscribe`.
    SubscriptionId
}

impl ObjectRef {
    /// Mint a reference for a new instance of `class_name`.
    #[must_use]
    pub fn for_class(class_name: &str) -> Self {
        Self(format!("{}_{class_name}", new_v7()))
    }

    /// Class name encoded in the reference suffix, if present.
    pub fn class_hint(&self) -> Option<&str> {
        self.0.rsplit_once('_').map(|(_, class)| class).filter(|c| !c.is_empty())
    }
}
