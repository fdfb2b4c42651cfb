use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub smooth: SmoothConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub depth: DepthConfig,
    #[serde(default)]
    pub segment: SegmentDefaults,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// 報告位置の平滑化
#[derive(Debug, Deserialize, Clone)]
pub struct SmoothConfig {
    /// 新しい観測位置へ補間で寄せる時間（秒）
    #[serde(default = "default_smooth_duration")]
    pub duration_secs: f32,
    /// この距離未満の変化は更新しない（メートル）
    #[serde(default = "default_epsilon")]
    pub epsilon_meters: f32,
}

fn default_smooth_duration() -> f32 { 0.1 }
fn default_epsilon() -> f32 { 0.005 }

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_smooth_duration(),
            epsilon_meters: default_epsilon(),
        }
    }
}

/// 深度ソースがない場合の球フォールバック
/// 半径とオフセットは配備先ごとのチューニングパラメータ
#[derive(Debug, Deserialize, Clone)]
pub struct FallbackConfig {
    /// 前回位置を中心とする球の半径（メートル）
    #[serde(default = "default_sphere_radius")]
    pub sphere_radius: f32,
    /// 球中心をカメラ前方へずらす距離（メートル）
    #[serde(default = "default_forward_offset")]
    pub forward_offset: f32,
}

fn default_sphere_radius() -> f32 { 0.3 }
fn default_forward_offset() -> f32 { 0.15 }

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            sphere_radius: default_sphere_radius(),
            forward_offset: default_forward_offset(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DepthConfig {
    /// 2Dマッチがこのピクセル数以内で動いた場合は前フレームの
    /// 深度インデックスを再利用する（サブピクセルノイズ対策）
    #[serde(default = "default_jitter_tolerance")]
    pub jitter_tolerance_px: u32,
}

fn default_jitter_tolerance() -> u32 { 10 }

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            jitter_tolerance_px: default_jitter_tolerance(),
        }
    }
}

/// リモートモードのクエリは色相範囲しか運ばないため、
/// 残りのしきい値はサーバ側の設定で補う
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentDefaults {
    #[serde(default = "default_min_saturation")]
    pub min_saturation: u8,
    #[serde(default = "default_min_brightness")]
    pub min_brightness: u8,
    #[serde(default = "default_min_region_area")]
    pub min_region_area: u32,
}

fn default_min_saturation() -> u8 { 50 }
fn default_min_brightness() -> u8 { 50 }
fn default_min_region_area() -> u32 { 100 }

impl Default for SegmentDefaults {
    fn default() -> Self {
        Self {
            min_saturation: default_min_saturation(),
            min_brightness: default_min_brightness(),
            min_region_area: default_min_region_area(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String { "0.0.0.0:32020".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
}

fn default_server_addr() -> String { "127.0.0.1:32020".to_string() }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 設定ファイルがない・壊れている場合はデフォルトで起動する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_default()
    }
}
