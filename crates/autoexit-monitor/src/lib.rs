//! Monitoring loops for autoexit.
//!
//! - [`PositionMonitor`]: fast loop that re-prices monitored positions,
//!   evaluates their exit conditions and drives exits through the
//!   [`autoexit_swap::SwapDispatcher`]
//! - [`DiscoveryLoop`]: slow loop that admits newly acquired assets from
//!   buy events and wallet balances
//! - [`sources`]: collaborator interfaces (prices, policies, buy events,
//!   balances, event sink)

pub mod discovery;
pub mod error;
pub mod event;
pub mod monitor;
pub mod sources;

pub use discovery::{DiscoveryConfig, DiscoveryLoop, DiscoverySummary};
pub use error::{MonitorError, MonitorResult};
pub use event::{ExitEvent, MonitorEvent};
pub use monitor::{MonitorConfig, PositionMonitor, TickSummary};
pub use sources::{
    BalanceSource, BuyEvent, BuyEventSource, DynBalanceSource, DynBuyEventSource, DynEventSink,
    DynExitPolicySource, DynPriceSource, EventSink, ExitPolicySource, FixedPrices, Holding,
    RecordingSink, StaticBalances, StaticBuyEvents, StaticPolicySource, PriceSource,
};
