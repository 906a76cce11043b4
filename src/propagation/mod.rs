//! Query Propagation Protocol
//!
//! Makes a query answered by one broker reflect what every online broker holds.
//!
//! ## Flow
//! 1. The primary registers a resolution waiter, then publishes its `QueryRequest`.
//! 2. Every broker (primary included) answers from local storage with a `QueryResponse`
//!    mapping message ids to content hashes.
//! 3. The **resolver** on the primary diffs each foreign answer against its own and
//!    awaits the missing records.
//! 4. The **dispatcher** on every other broker diffs its own answer against the primary's
//!    and publishes a `QueryPropagate` with the records the primary lacks.
//! 5. Verified records are stored. The request resolves once the quorum has answered
//!    and nothing is awaited, or fails with a timeout.

pub mod dispatcher;
pub mod request_manager;
pub mod resolver;
pub mod response_manager;
pub mod types;

pub use dispatcher::PropagationDispatcher;
pub use request_manager::QueryRequestManager;
pub use resolver::PropagationResolver;
pub use response_manager::QueryResponseManager;
pub use types::{QueryHashMap, Resolution};

#[cfg(test)]
mod tests;
