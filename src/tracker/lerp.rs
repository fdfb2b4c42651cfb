use nalgebra::Vector3;

use crate::config::SmoothConfig;

/// 観測位置の変化を一定時間かけて補間するレーパー
///
/// 新しい観測が来るたびにスナップすると位置がジッタするため、
/// 表示位置は固定時間で新しい観測へ寄せる。イプシロン未満の変化は
/// 無視して無駄な更新をしない。
pub struct Lerper {
    start: Option<Vector3<f32>>,
    end: Option<Vector3<f32>>,
    t: f32,
    duration_secs: f32,
    epsilon: f32,
}

impl Lerper {
    pub fn new(duration_secs: f32, epsilon: f32) -> Self {
        Self {
            start: None,
            end: None,
            t: 1.0,
            duration_secs,
            epsilon,
        }
    }

    pub fn from_config(config: &SmoothConfig) -> Self {
        Self::new(config.duration_secs, config.epsilon_meters)
    }

    /// 新しい観測位置をセットする
    /// 初回はそのままスナップ。2回目以降は現在の補間値を新しいstartにして
    /// ジャンプを防ぐ。
    pub fn set_target(&mut self, target: Vector3<f32>) {
        match self.current() {
            None => {
                self.start = Some(target);
                self.end = Some(target);
                self.t = 1.0;
            }
            Some(current) => {
                if (target - current).norm() < self.epsilon {
                    return;
                }
                self.start = Some(current);
                self.end = Some(target);
                self.t = 0.0;
            }
        }
    }

    /// 経過時間分だけ補間を進める
    pub fn advance(&mut self, dt_secs: f32) {
        if self.duration_secs <= 0.0 {
            self.t = 1.0;
        } else {
            self.t = (self.t + dt_secs / self.duration_secs).clamp(0.0, 1.0);
        }
    }

    /// 現在の補間位置。一度もset_targetされていなければNone
    pub fn current(&self) -> Option<Vector3<f32>> {
        let start = self.start?;
        let end = self.end?;
        Some(start + (end - start) * self.t)
    }

    pub fn reset(&mut self) {
        self.start = None;
        self.end = None;
        self.t = 1.0;
    }
}
