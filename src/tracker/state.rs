use nalgebra::Vector3;

use crate::config::SmoothConfig;
use crate::tracker::lerp::Lerper;

/// トラックのライフサイクル状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPhase {
    /// 一度も捕捉されていない
    Uninitialized,
    /// 捕捉中（ヒステリシス内のミスを含む）
    Active,
    /// 連続ミスが上限を超えて見失った
    Lost,
}

/// トラッカー1つ分の継続性ステートマシン
///
/// 検出の成否と解決済み位置の列から、ヒステリシスと平滑化を適用した
/// 安定な3D位置を作る。状態遷移はミスカウンタとmax_missesの比較だけで
/// 決まり、他のトラッカーと結合しない。
pub struct TrackState {
    id: u32,
    phase: TrackPhase,
    misses: u32,
    max_misses: u32,
    lerper: Lerper,
    /// 直近の生の解決位置。球フォールバックのシードに使う
    seed: Option<Vector3<f32>>,
    /// 直近の2Dマッチ画素（深度インデックスの再利用判定用）
    pub(crate) last_pixel: Option<(u32, u32)>,
    pub(crate) last_depth_index: Option<(u32, u32)>,
}

impl TrackState {
    pub fn new(id: u32, max_misses: u32, smooth: &SmoothConfig) -> Self {
        Self {
            id,
            phase: TrackPhase::Uninitialized,
            misses: 0,
            max_misses,
            lerper: Lerper::from_config(smooth),
            seed: None,
            last_pixel: None,
            last_depth_index: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn phase(&self) -> TrackPhase {
        self.phase
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// 補間を進める。フレームごとに観測の前に1回呼ぶ
    pub fn advance(&mut self, dt_secs: f32) {
        self.lerper.advance(dt_secs);
    }

    /// 検出成功 + 位置解決済み
    /// どの状態からでもActiveへ遷移し、ミスカウンタをリセットする
    pub fn observe_found(&mut self, position: Vector3<f32>) {
        self.misses = 0;
        self.phase = TrackPhase::Active;
        self.seed = Some(position);
        self.lerper.set_target(position);
    }

    /// 未検出、または検出はされたが位置を解決できなかった
    pub fn observe_miss(&mut self) {
        self.misses = self.misses.saturating_add(1);
        if self.phase == TrackPhase::Active && self.misses > self.max_misses {
            self.phase = TrackPhase::Lost;
        }
    }

    /// 消費者に見せる位置。Activeの間だけ返す
    /// ヒステリシス内のミスでは直前の位置を保持する
    pub fn position(&self) -> Option<Vector3<f32>> {
        if self.phase == TrackPhase::Active {
            self.lerper.current()
        } else {
            None
        }
    }

    /// 球フォールバックのシード。Activeなトラックにしか存在しない
    pub fn seed_position(&self) -> Option<Vector3<f32>> {
        if self.phase == TrackPhase::Active {
            self.seed
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max_misses: u32) -> TrackState {
        TrackState::new(0, max_misses, &SmoothConfig::default())
    }

    fn v(x: f32, y: f32, z: f32) -> Vector3<f32> {
        Vector3::new(x, y, z)
    }

    #[test]
    fn test_starts_uninitialized() {
        let s = state(3);
        assert_eq!(s.phase(), TrackPhase::Uninitialized);
        assert!(s.position().is_none());
    }

    #[test]
    fn test_found_activates() {
        let mut s = state(3);
        s.observe_found(v(1.0, 0.0, -2.0));
        assert_eq!(s.phase(), TrackPhase::Active);
        let p = s.position().unwrap();
        assert!((p - v(1.0, 0.0, -2.0)).norm() < 1e-6);
    }

    #[test]
    fn test_hysteresis_n_misses_keep_active() {
        // max_misses = N回の連続ミスではActiveのまま
        let n = 3;
        let mut s = state(n);
        s.observe_found(v(0.0, 0.0, -1.0));
        for _ in 0..n {
            s.observe_miss();
        }
        assert_eq!(s.phase(), TrackPhase::Active);
        // 位置は保持される
        assert!(s.position().is_some());
    }

    #[test]
    fn test_hysteresis_n_plus_one_goes_lost() {
        let n = 3;
        let mut s = state(n);
        s.observe_found(v(0.0, 0.0, -1.0));
        for _ in 0..(n + 1) {
            s.observe_miss();
        }
        assert_eq!(s.phase(), TrackPhase::Lost);
        assert!(s.position().is_none());
    }

    #[test]
    fn test_reacquire_resets_misses() {
        let mut s = state(2);
        s.observe_found(v(0.0, 0.0, -1.0));
        for _ in 0..5 {
            s.observe_miss();
        }
        assert_eq!(s.phase(), TrackPhase::Lost);

        // Lostからの再捕捉はFoundと同じ遷移
        s.observe_found(v(0.5, 0.0, -1.0));
        assert_eq!(s.phase(), TrackPhase::Active);
        assert_eq!(s.misses(), 0);
    }

    #[test]
    fn test_miss_within_hysteresis_then_found_resets() {
        let mut s = state(3);
        s.observe_found(v(0.0, 0.0, -1.0));
        s.observe_miss();
        s.observe_miss();
        s.observe_found(v(0.0, 0.0, -1.0));
        assert_eq!(s.misses(), 0);
        assert_eq!(s.phase(), TrackPhase::Active);
    }

    #[test]
    fn test_uninitialized_misses_never_go_lost() {
        let mut s = state(1);
        for _ in 0..10 {
            s.observe_miss();
        }
        assert_eq!(s.phase(), TrackPhase::Uninitialized);
    }

    #[test]
    fn test_seed_only_while_active() {
        let mut s = state(1);
        assert!(s.seed_position().is_none());
        s.observe_found(v(1.0, 1.0, -1.0));
        assert!(s.seed_position().is_some());
        s.observe_miss();
        s.observe_miss();
        assert_eq!(s.phase(), TrackPhase::Lost);
        assert!(s.seed_position().is_none());
    }

    #[test]
    fn test_position_interpolates_toward_new_observation() {
        let mut s = TrackState::new(
            0,
            3,
            &SmoothConfig {
                duration_secs: 0.1,
                epsilon_meters: 0.005,
            },
        );
        s.observe_found(v(0.0, 0.0, 0.0));
        s.advance(0.05);
        s.observe_found(v(1.0, 0.0, 0.0));
        // 補間開始直後はまだ旧位置寄り
        let p = s.position().unwrap();
        assert!(p[0] < 0.01, "position should not snap, got {}", p[0]);
        s.advance(0.05);
        let p = s.position().unwrap();
        assert!((p[0] - 0.5).abs() < 1e-5, "halfway expected, got {}", p[0]);
    }
}
