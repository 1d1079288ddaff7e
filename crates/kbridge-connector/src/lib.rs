//! Turn routing and knowledge-base response digestion.
//!
//! [`TurnRouter`] decides per webhook turn whether the knowledge base gets
//! involved; [`ResponseDigester`] owns the threshold decision and turns
//! knowledge-base answers into [`OutputBlock`](kbridge_protocol::OutputBlock)s.

pub mod clean;
pub mod digester;
pub mod error;
pub mod escalation;
pub mod router;
pub mod sentinel;
pub mod threshold;

pub use clean::clean_message;
pub use digester::ResponseDigester;
pub use error::ConnectorError;
pub use escalation::{Escalation, Settled};
pub use router::{Outcome, Routed, TurnRouter};
pub use threshold::{Decision, Trigger};
