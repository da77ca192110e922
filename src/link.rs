//! Link-level helper state machines.
//!
//! Each helper is a small self-contained state object owned either by a
//! connection (ARQ, CCA, credits, LQI, gain, fallback, phase, connect
//! status) or by the MAC itself (channel hopping, RDO, DDCM, TDMA sync).

pub mod cca;
pub mod channel_hopping;
pub mod connect_status;
pub mod credit_flow;
pub mod ddcm;
pub mod fallback;
pub mod gain_loop;
pub mod lqi;
pub mod phase;
pub mod rdo;
pub mod saw_arq;
pub mod tdma_sync;

pub use cca::{CcaFailAction, LinkCca};
pub use channel_hopping::{ChannelHopping, ChannelSequence};
pub use connect_status::{ConnectStatus, ConnectStatusCfg, ConnectStatusState};
pub use credit_flow::CreditFlowCtrl;
pub use ddcm::LinkDdcm;
pub use fallback::LinkFallback;
pub use gain_loop::GainLoop;
pub use lqi::Lqi;
pub use phase::{LinkPhase, PhaseInfos};
pub use rdo::LinkRdo;
pub use saw_arq::SawArq;
pub use tdma_sync::{TdmaSync, TdmaSyncCfg};
