// =============================================================================
// Domain models — value types shared across every component
// =============================================================================
//
// Nothing in this module talks to a socket, a lock, or a clock beyond reading
// `DateTime<Utc>` values handed to it. Everything here is plain data plus the
// small amount of arithmetic (notional value, top-of-book access) that is
// cheap enough to live on the type itself.
// =============================================================================

pub mod market;
pub mod risk;
pub mod signals;
pub mod trading;

pub use market::{MarketTick, OrderBookLevel, OrderBookSnapshot, Side};
pub use risk::RiskConfig;
pub use signals::{FlashPumpSignal, PumpCandidate, ReversalSignal};
pub use trading::{Order, OrderSide, Position, PositionStatus, Trade, TradingMode};
