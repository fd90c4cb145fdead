// 基本的なデータ型と数学ユーティリティ
pub mod common;

// エージェントの基本インターフェース（trait）定義
pub mod traits;

// 幾何と制御則
pub mod dubins;
pub mod control;

// 運動プリミティブと飛行段階
pub mod primitives;
pub mod stage;

// エージェント・空港・フリート
pub mod drone;
pub mod airport;
pub mod scheduler;
pub mod package;
pub mod fleet;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use dubins::{DubinsPath, PathFamily, Pose2, Turn};
pub use stage::{FlightCommand, FlightStage};
pub use drone::{DroneAgent, DroneDirective, RaiseCause};
pub use airport::{Airport, AirportDimensions, Gate};
pub use scheduler::{AirportScheduler, AirportStatus};
pub use package::{DeliveryRecord, Package};
pub use fleet::{FleetConfig, FleetCoordinator, FleetError, FleetStats, SchedulingPolicy, Supervisor};
