//! 有理数时间基, 以及时间基与微秒之间的换算.
//!
//! 容器内部的时间戳以各自的时间基计数 (如 Ogg granule 以 1/采样率 为单位),
//! 提取门面对外统一使用微秒.

use std::fmt;

/// 每秒微秒数
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// 有理数, 由分子和分母组成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// 分子
    pub num: i32,
    /// 分母
    pub den: i32,
}

/// 时间基换算时的取整方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// 向下取整
    Down,
    /// 向上取整
    Up,
    /// 四舍五入
    Nearest,
}

impl Rational {
    /// 创建新的有理数
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 未定义 (分母为 0)
    pub const UNDEFINED: Self = Self { num: 0, den: 0 };

    /// 微秒时间基 (1/1_000_000)
    pub const MICRO: Self = Self {
        num: 1,
        den: 1_000_000,
    };

    /// 判断是否有效 (分子分母均不为 0)
    pub const fn is_valid(&self) -> bool {
        self.den != 0 && self.num != 0
    }

    /// 转换为 f64 浮点数, 分母为 0 时返回 NaN
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        f64::from(self.num) / f64::from(self.den)
    }

    /// 将以 `self` 为时间基的值重缩放到 `target` 时间基
    ///
    /// new = value * self.num * target.den / (self.den * target.num),
    /// 使用 i128 中间值避免溢出. 任一时间基无效时返回 None.
    pub fn rescale(self, value: i64, target: Rational, rounding: Rounding) -> Option<i64> {
        if !self.is_valid() || !target.is_valid() {
            return None;
        }
        let num = i128::from(value) * i128::from(self.num) * i128::from(target.den);
        let den = i128::from(self.den) * i128::from(target.num);
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let q = match rounding {
            Rounding::Down => num.div_euclid(den),
            Rounding::Up => -((-num).div_euclid(den)),
            Rounding::Nearest => (2 * num + den).div_euclid(2 * den),
        };
        i64::try_from(q).ok()
    }

    /// 将以 `self` 为时间基的值换算为微秒 (向下取整)
    pub fn to_micros(self, value: i64) -> Option<i64> {
        self.rescale(value, Self::MICRO, Rounding::Down)
    }

    /// 将微秒换算为以 `self` 为时间基的值
    pub fn from_micros(self, micros: i64, rounding: Rounding) -> Option<i64> {
        Self::MICRO.rescale(micros, self, rounding)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self { num, den }
    }
}
