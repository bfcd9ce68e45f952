//! Remote lifecycle states
//!
//! Each resource kind describes the statuses its control plane reports as an
//! enum implementing [`LifecycleState`], together with the transitions the
//! control plane is documented to make. The poller only needs set membership;
//! the transition table is used to flag surprising observations in the logs.

use std::fmt::{Debug, Display};
use std::str::FromStr;

pub trait LifecycleState:
    Clone + Eq + Debug + Display + FromStr + Send + Sync + 'static
{
    /// Whether the control plane may report `next` directly after `self`.
    /// Staying in the same state is always allowed.
    fn can_transition_to(&self, next: &Self) -> bool;
}

/// Error returned when a remote status string is not one of a kind's known states.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lifecycle state {0:?}")]
pub struct UnknownState(pub String);

/// Declare a lifecycle-state enum whose variants map to the remote status strings.
///
/// ```ignore
/// lifecycle_states! {
///     pub enum GatewayState {
///         Pending => "PENDING",
///         Available => "AVAILABLE",
///     }
/// }
/// ```
#[macro_export]
macro_rules! lifecycle_states {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $variant ),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::state::UnknownState;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::state::UnknownState(other.to_string())),
                }
            }
        }
    };
}

lifecycle_states! {
    /// State of kinds whose remote calls take effect before they return.
    pub enum Synchronous {
        Available => "AVAILABLE",
    }
}

impl LifecycleState for Synchronous {
    fn can_transition_to(&self, _next: &Self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    lifecycle_states! {
        enum Light {
            Red => "RED",
            Green => "GREEN",
            Amber => "AMBER",
        }
    }

    impl LifecycleState for Light {
        fn can_transition_to(&self, next: &Self) -> bool {
            use Light::*;
            self == next
                || matches!(
                    (self, next),
                    (Red, Green) | (Green, Amber) | (Amber, Red)
                )
        }
    }

    #[test]
    fn parses_and_displays_remote_strings() {
        assert_eq!("GREEN".parse::<Light>().unwrap(), Light::Green);
        assert_eq!(Light::Amber.to_string(), "AMBER");
        assert_eq!(
            "BLUE".parse::<Light>().unwrap_err(),
            UnknownState("BLUE".to_string())
        );
    }

    #[test]
    fn transition_table() {
        assert!(Light::Red.can_transition_to(&Light::Green));
        assert!(Light::Red.can_transition_to(&Light::Red));
        assert!(!Light::Red.can_transition_to(&Light::Amber));
    }

    #[test]
    fn synchronous_state_round_trips() {
        assert_eq!(Synchronous::Available.to_string(), "AVAILABLE");
        assert_eq!(
            "AVAILABLE".parse::<Synchronous>().unwrap(),
            Synchronous::Available
        );
    }
}
