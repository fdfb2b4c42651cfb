//! 色ベースのセグメンテーション
//!
//! カラーフレームと受理範囲から、最も良くマッチする領域の2D画素位置を求める。
//! しきい値処理 → モルフォロジーによるノイズ除去 → 連結成分抽出 →
//! 面積下限で棄却 → 最大成分の重心、という流れ。

pub mod contour;
pub mod hsv;
pub mod mask;

use crate::error::ConfigError;
use crate::frame::{ColorFrame, MatchResult, TrackerQuery};

pub use contour::{find_regions, largest_above, Region};
pub use hsv::rgb_to_hsv;
pub use mask::{dilate, erode, threshold, Mask};

/// スペックル除去用の収縮カーネルとパス数
const EROSION_KERNEL: usize = 3;
const EROSION_PASSES: usize = 2;
/// 収縮で痩せた実物体を復元するための膨張カーネルとパス数
/// 収縮より大きいカーネルを使い、小さい実領域が消えないようにする
const DILATION_KERNEL: usize = 8;
const DILATION_PASSES: usize = 2;

/// 1トラッカー分のセグメンテーション
///
/// 空フレームは未検出。反転した色相範囲は設定エラーとして返す。
pub fn segment(frame: &ColorFrame, query: &TrackerQuery) -> Result<MatchResult, ConfigError> {
    query.validate()?;

    if frame.is_empty() {
        return Ok(MatchResult::not_found(query.id));
    }

    let support = threshold(frame, query);

    let mut processed = support.clone();
    for _ in 0..EROSION_PASSES {
        processed = erode(&processed, EROSION_KERNEL);
    }
    for _ in 0..DILATION_PASSES {
        processed = dilate(&processed, DILATION_KERNEL);
    }

    let regions = find_regions(&processed, &support);
    match largest_above(&regions, query.min_region_area) {
        Some(region) => {
            let (cx, cy) = region.centroid();
            Ok(MatchResult::found(query.id, cx, cy))
        }
        None => Ok(MatchResult::not_found(query.id)),
    }
}
