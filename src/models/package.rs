use crate::models::airport::Gate;
use serde::Serialize;

/// 配送依頼
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Package {
    pub id: usize,
    pub from_airport: usize,
    pub from_gate: Gate,
    pub to_airport: usize,
    pub to_gate: Gate,
    /// 荷物を保持している機体
    pub transporter: Option<usize>,
    /// 集荷に向かっている機体
    pub reserver: Option<usize>,
    pub picked_up: bool,
    pub requested_at: f64,
}

impl Package {
    pub fn new(id: usize, from_airport: usize, from_gate: Gate, to_airport: usize, to_gate: Gate, requested_at: f64) -> Self {
        Self {
            id,
            from_airport,
            from_gate,
            to_airport,
            to_gate,
            transporter: None,
            reserver: None,
            picked_up: false,
            requested_at,
        }
    }

    /// 誰にも割り当てられていないか
    pub fn is_unassigned(&self) -> bool {
        self.transporter.is_none() && self.reserver.is_none() && !self.picked_up
    }

    /// 集荷地点 (空港, ゲート)
    pub fn origin(&self) -> (usize, Gate) {
        (self.from_airport, self.from_gate)
    }

    /// 配送先 (空港, ゲート)
    pub fn destination(&self) -> (usize, Gate) {
        (self.to_airport, self.to_gate)
    }
}

/// 配送済み記録
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryRecord {
    pub package: Package,
    pub drone: usize,
    pub delivered_at: f64,
}
