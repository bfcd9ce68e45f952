pub mod instance;
pub mod packet_filter;
pub mod security_rule;

pub use instance::{InstanceGroup, InstanceKind, InstanceSpec, InstanceState};
pub use packet_filter::{PacketFilterGroup, PacketFilterKind, PacketFilterSpec};
pub use security_rule::{SecurityRuleGroup, SecurityRuleKind, SecurityRuleSpec};
