//! フレームごとの追跡パイプライン
//!
//! 登録済みトラッカーの集合を持ち、セグメンタ（ローカルまたはリモート）の
//! 結果をプロジェクタとステートマシンに流す。TrackStateの変更は
//! フレーム単位で一括して行い、このモジュール以外からは触らない。

use nalgebra::Vector3;

use crate::config::{Config, SmoothConfig};
use crate::error::ConfigError;
use crate::frame::{ColorFrame, DepthFrame, MatchResult, TrackerQuery};
use crate::projection::{self, Projector, WorldPose};
use crate::segment;
use crate::tracker::{TrackPhase, TrackState};

/// 1トラッカー・1フレーム分の消費者向け出力
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerUpdate {
    pub id: u32,
    pub phase: TrackPhase,
    /// Activeの間だけ存在する平滑化済みのワールド位置
    pub position: Option<Vector3<f32>>,
}

struct TrackerEntry {
    query: TrackerQuery,
    state: TrackState,
}

pub struct Pipeline {
    entries: Vec<TrackerEntry>,
    projector: Projector,
    smooth: SmoothConfig,
    jitter_tolerance_px: u32,
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            entries: Vec::new(),
            projector: Projector::from_config(&config.fallback),
            smooth: config.smooth.clone(),
            jitter_tolerance_px: config.depth.jitter_tolerance_px,
        }
    }

    /// トラッカーを登録する。不正なクエリはここで拒否する
    pub fn register(&mut self, query: TrackerQuery) -> Result<(), ConfigError> {
        query.validate()?;
        if self.entries.iter().any(|e| e.query.id == query.id) {
            return Err(ConfigError::DuplicateTracker(query.id));
        }
        let state = TrackState::new(query.id, query.max_misses, &self.smooth);
        self.entries.push(TrackerEntry { query, state });
        Ok(())
    }

    /// トラッカーを登録解除する。状態も破棄される
    pub fn unregister(&mut self, id: u32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.query.id != id);
        self.entries.len() != before
    }

    /// 登録順のクエリスナップショット（リモートリクエストの並び順）
    pub fn queries(&self) -> Vec<TrackerQuery> {
        self.entries.iter().map(|e| e.query.clone()).collect()
    }

    pub fn tracker_count(&self) -> usize {
        self.entries.len()
    }

    /// ローカルモード: フレームをその場でセグメントして適用する
    pub fn process_frame(
        &mut self,
        frame: &ColorFrame,
        pose: &WorldPose,
        depth: Option<&DepthFrame>,
        dt_secs: f32,
    ) -> Result<Vec<TrackerUpdate>, ConfigError> {
        let mut results = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            results.push(segment::segment(frame, &entry.query)?);
        }
        Ok(self.apply_results(&results, Some(pose), depth, frame.resolution(), dt_secs))
    }

    /// セグメント結果の一括適用（リモートモードの受信側もここに合流する）
    ///
    /// poseがない場合は全トラッカーをミス扱いにする。あるトラッカーの
    /// 幾何エラーは他のトラッカーに波及しない。
    pub fn apply_results(
        &mut self,
        results: &[MatchResult],
        pose: Option<&WorldPose>,
        depth: Option<&DepthFrame>,
        resolution: (u32, u32),
        dt_secs: f32,
    ) -> Vec<TrackerUpdate> {
        let projector = &self.projector;
        let tolerance = self.jitter_tolerance_px;
        let mut updates = Vec::with_capacity(self.entries.len());

        for entry in &mut self.entries {
            entry.state.advance(dt_secs);

            let result = results.iter().find(|r| r.id == entry.query.id).copied();
            match Self::resolve(projector, tolerance, entry, result, pose, depth, resolution) {
                Some(position) => entry.state.observe_found(position),
                None => entry.state.observe_miss(),
            }

            updates.push(TrackerUpdate {
                id: entry.state.id(),
                phase: entry.state.phase(),
                position: entry.state.position(),
            });
        }
        updates
    }

    /// 全トラッカーに1ミスを与える（リモート切断中のフレーム用）
    /// Activeなトラックは通常のヒステリシスでLostまで減衰する
    pub fn mark_all_missed(&mut self, dt_secs: f32) -> Vec<TrackerUpdate> {
        self.apply_results(&[], None, None, (0, 0), dt_secs)
    }

    /// 2Dマッチを3D位置へ解決する
    /// 深度サンプル → 球フォールバック → 解決不能（ミス扱い）の順
    fn resolve(
        projector: &Projector,
        tolerance_px: u32,
        entry: &mut TrackerEntry,
        result: Option<MatchResult>,
        pose: Option<&WorldPose>,
        depth: Option<&DepthFrame>,
        resolution: (u32, u32),
    ) -> Option<Vector3<f32>> {
        let pixel = result?.pixel?;
        let pose = pose?;
        let ray = projection::project(pixel, pose, resolution)?;

        let position = if let Some(depth) = depth {
            // マッチの移動が許容ピクセル以内なら前フレームの深度インデックスを
            // 再利用し、サブピクセルノイズによるインデックスのちらつきを抑える
            let index = match (entry.state.last_pixel, entry.state.last_depth_index) {
                (Some(prev), Some(idx)) if pixel_within(prev, pixel, tolerance_px) => idx,
                _ => depth.map_color_pixel(pixel),
            };
            entry.state.last_depth_index = Some(index);

            match depth.sample_meters(index) {
                Some(meters) => Some(projector.resolve_with_depth(&ray, meters)),
                // 深度サンプル欠落: シードがあれば球フォールバックへ
                None => entry
                    .state
                    .seed_position()
                    .and_then(|seed| projector.resolve_with_sphere(&ray, pose, &seed)),
            }
        } else {
            entry
                .state
                .seed_position()
                .and_then(|seed| projector.resolve_with_sphere(&ray, pose, &seed))
        };

        entry.state.last_pixel = Some(pixel);
        position
    }
}

fn pixel_within(a: (u32, u32), b: (u32, u32), tolerance: u32) -> bool {
    a.0.abs_diff(b.0) <= tolerance && a.1.abs_diff(b.1) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix4;

    const DT: f32 = 1.0 / 30.0;

    fn perspective() -> Matrix4<f32> {
        let f = 1.0 / (30.0f32.to_radians()).tan();
        Matrix4::new(
            f, 0.0, 0.0, 0.0,
            0.0, f, 0.0, 0.0,
            0.0, 0.0, -1.002, -0.2002,
            0.0, 0.0, -1.0, 0.0,
        )
    }

    fn pose() -> WorldPose {
        WorldPose::new(Matrix4::identity(), perspective()).unwrap()
    }

    fn query(id: u32) -> TrackerQuery {
        TrackerQuery {
            id,
            min_hue: 40,
            max_hue: 80,
            min_saturation: 50,
            min_brightness: 50,
            min_region_area: 100,
            max_misses: 2,
        }
    }

    fn green_frame(w: u32, h: u32) -> ColorFrame {
        // 中央に20x20の緑ブロック
        let mut data = vec![0u8; (w * h * 4) as usize];
        for y in (h / 2 - 10)..(h / 2 + 10) {
            for x in (w / 2 - 10)..(w / 2 + 10) {
                let i = ((y * w + x) * 4) as usize;
                data[i + 1] = 255;
                data[i + 3] = 255;
            }
        }
        ColorFrame::new(w, h, 4, data).unwrap()
    }

    fn black_frame(w: u32, h: u32) -> ColorFrame {
        ColorFrame::new(w, h, 4, vec![0u8; (w * h * 4) as usize]).unwrap()
    }

    fn depth_2m(w: u32, h: u32) -> DepthFrame {
        DepthFrame::new(w, h, vec![2000u16; (w * h) as usize], 0.001, 1.0).unwrap()
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(&Config::default())
    }

    #[test]
    fn test_register_rejects_reversed_range() {
        let mut p = pipeline();
        let mut q = query(0);
        q.min_hue = 100;
        q.max_hue = 50;
        assert!(p.register(q).is_err());
        assert_eq!(p.tracker_count(), 0);
    }

    #[test]
    fn test_register_rejects_duplicate_id() {
        let mut p = pipeline();
        p.register(query(1)).unwrap();
        assert_eq!(
            p.register(query(1)),
            Err(ConfigError::DuplicateTracker(1))
        );
    }

    #[test]
    fn test_unregister_removes_state() {
        let mut p = pipeline();
        p.register(query(1)).unwrap();
        assert!(p.unregister(1));
        assert!(!p.unregister(1));
        assert_eq!(p.tracker_count(), 0);
    }

    #[test]
    fn test_found_with_depth_activates_at_measured_distance() {
        let mut p = pipeline();
        p.register(query(0)).unwrap();
        let frame = green_frame(100, 100);
        let depth = depth_2m(100, 100);

        let updates = p
            .process_frame(&frame, &pose(), Some(&depth), DT)
            .unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].phase, TrackPhase::Active);
        let position = updates[0].position.unwrap();
        // 深度2mなのでカメラからの距離は約2m、カメラ前方(-Z)
        assert!((position.norm() - 2.0).abs() < 0.05, "norm={}", position.norm());
        assert!(position[2] < 0.0);
    }

    #[test]
    fn test_hysteresis_until_lost() {
        let mut p = pipeline();
        p.register(query(0)).unwrap(); // max_misses = 2
        let depth = depth_2m(100, 100);

        p.process_frame(&green_frame(100, 100), &pose(), Some(&depth), DT)
            .unwrap();

        // 2回のミスまではActiveで位置保持
        let black = black_frame(100, 100);
        for _ in 0..2 {
            let updates = p.process_frame(&black, &pose(), Some(&depth), DT).unwrap();
            assert_eq!(updates[0].phase, TrackPhase::Active);
            assert!(updates[0].position.is_some());
        }

        // 3回目でLost
        let updates = p.process_frame(&black, &pose(), Some(&depth), DT).unwrap();
        assert_eq!(updates[0].phase, TrackPhase::Lost);
        assert!(updates[0].position.is_none());
    }

    #[test]
    fn test_found_without_depth_and_without_seed_is_a_miss() {
        // 深度なし・前回位置なしでは3D解決できず、未検出扱いになる
        let mut p = pipeline();
        p.register(query(0)).unwrap();
        let updates = p
            .process_frame(&green_frame(100, 100), &pose(), None, DT)
            .unwrap();
        assert_eq!(updates[0].phase, TrackPhase::Uninitialized);
        assert!(updates[0].position.is_none());
    }

    #[test]
    fn test_sphere_fallback_after_depth_seeded() {
        let mut p = pipeline();
        p.register(query(0)).unwrap();
        let frame = green_frame(100, 100);

        // 深度ありで捕捉してシードを作る
        p.process_frame(&frame, &pose(), Some(&depth_2m(100, 100)), DT)
            .unwrap();

        // 深度が止まっても球フォールバックで追跡が続く
        let updates = p.process_frame(&frame, &pose(), None, DT).unwrap();
        assert_eq!(updates[0].phase, TrackPhase::Active);
        let position = updates[0].position.unwrap();
        assert!(position[2] < -1.0, "z={}", position[2]);
    }

    #[test]
    fn test_missing_pose_misses_all_trackers() {
        let mut p = pipeline();
        p.register(query(0)).unwrap();
        p.register(query(1)).unwrap();
        let results = [MatchResult::found(0, 50, 50), MatchResult::found(1, 50, 50)];
        let updates = p.apply_results(&results, None, None, (100, 100), DT);
        assert!(updates.iter().all(|u| u.position.is_none()));
    }

    #[test]
    fn test_trackers_are_independent() {
        let mut p = pipeline();
        p.register(query(0)).unwrap();
        let mut red = query(1);
        red.min_hue = 0;
        red.max_hue = 10;
        p.register(red).unwrap();

        let updates = p
            .process_frame(&green_frame(100, 100), &pose(), Some(&depth_2m(100, 100)), DT)
            .unwrap();
        // 緑トラッカーだけActiveになり、赤はUninitializedのまま
        assert_eq!(updates[0].phase, TrackPhase::Active);
        assert_eq!(updates[1].phase, TrackPhase::Uninitialized);
    }

    #[test]
    fn test_mark_all_missed_decays_to_lost() {
        let mut p = pipeline();
        p.register(query(0)).unwrap();
        p.process_frame(&green_frame(100, 100), &pose(), Some(&depth_2m(100, 100)), DT)
            .unwrap();

        for _ in 0..2 {
            let updates = p.mark_all_missed(DT);
            assert_eq!(updates[0].phase, TrackPhase::Active);
        }
        let updates = p.mark_all_missed(DT);
        assert_eq!(updates[0].phase, TrackPhase::Lost);
    }
}
