use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// 3次元位置を表す構造体
///
/// X/Z が水平面、Y が高度。地上のチェックポイントは Y = -1 で表現される。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64, // m
    pub y: f64, // m (altitude)
    pub z: f64, // m
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// XZ平面での2次元距離を計算
    pub fn distance_horizontal(&self, other: &Point3) -> f64 {
        ((self.x - other.x).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }

    /// 3次元距離を計算
    pub fn distance_3d(&self, other: &Point3) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }

    /// 高度だけを差し替えた点
    pub fn with_height(&self, y: f64) -> Self {
        Self::new(self.x, y, self.z)
    }

    /// 水平面への射影
    pub fn horizontal(&self) -> Point2 {
        Point2::new(self.x, self.z)
    }

    /// 地上の点（タキシング用チェックポイント）かどうか
    pub fn is_ground_point(&self) -> bool {
        self.y < 0.0
    }
}

impl Add<Vector3> for Point3 {
    type Output = Self;

    fn add(self, v: Vector3) -> Self::Output {
        Self::new(self.x + v.x, self.y + v.y, self.z + v.z)
    }
}

impl Sub<Vector3> for Point3 {
    type Output = Self;

    fn sub(self, v: Vector3) -> Self::Output {
        Self::new(self.x - v.x, self.y - v.y, self.z - v.z)
    }
}

impl Sub for Point3 {
    type Output = Vector3;

    fn sub(self, other: Self) -> Self::Output {
        Vector3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

/// 水平面上の2次元点 (X, Z)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    pub x: f64,
    pub z: f64,
}

impl Point2 {
    pub const fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }

    pub fn at_height(&self, y: f64) -> Point3 {
        Point3::new(self.x, y, self.z)
    }
}

/// 3次元ベクトル
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }

    /// XZ平面での大きさ
    pub fn magnitude_horizontal(&self) -> f64 {
        (self.x.powi(2) + self.z.powi(2)).sqrt()
    }

    /// 正規化（ゼロベクトルはそのまま）
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag > 0.0 {
            *self * (1.0 / mag)
        } else {
            *self
        }
    }
}

impl Add for Vector3 {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

impl Neg for Vector3 {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// 飛行力学側から毎ティック渡される姿勢スナップショット
///
/// 方位角は `atan2(-dx, -dz)` 規約（0 で -Z 方向、正で左旋回側）。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: Point3,
    pub heading: f64, // rad
    pub pitch: f64,   // rad
    pub roll: f64,    // rad
    pub elapsed: f64, // s
}

impl Pose {
    pub fn new(position: Point3, heading: f64, pitch: f64, roll: f64, elapsed: f64) -> Self {
        Self { position, heading, pitch, roll, elapsed }
    }

    pub fn altitude(&self) -> f64 {
        self.position.y
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use super::Point3;
    use std::f64::consts::{PI, TAU};

    /// 度をラジアンに変換
    pub fn deg_to_rad(degrees: f64) -> f64 {
        degrees * PI / 180.0
    }

    /// ラジアンを度に変換
    pub fn rad_to_deg(radians: f64) -> f64 {
        radians * 180.0 / PI
    }

    /// 角度を -π〜π の範囲に正規化
    pub fn normalize_angle(angle: f64) -> f64 {
        let mut normalized = angle % TAU;
        if normalized > PI {
            normalized -= TAU;
        } else if normalized <= -PI {
            normalized += TAU;
        }
        normalized
    }

    /// 角度を 0〜2π の範囲に正規化
    pub fn mod2pi(angle: f64) -> f64 {
        let wrapped = angle.rem_euclid(TAU);
        // rem_euclid は丸めで TAU ちょうどを返すことがある
        if wrapped >= TAU { 0.0 } else { wrapped }
    }

    /// `from` から `to` へ向かう方位角
    pub fn bearing(from: &Point3, to: &Point3) -> f64 {
        (-(to.x - from.x)).atan2(-(to.z - from.z))
    }

    /// 目標へ向くために必要な方位変化量（正で左旋回）
    ///
    /// # 引数
    ///
    /// * `heading` - 現在の方位角
    /// * `from` - 現在位置
    /// * `to` - 目標位置
    ///
    /// # 戻り値
    ///
    /// -π〜π に正規化された方位差
    pub fn heading_delta(heading: f64, from: &Point3, to: &Point3) -> f64 {
        normalize_angle(bearing(from, to) - heading)
    }
}
