use crate::error::{ConfigError, FrameError};

/// HoloLensキャプチャのピクセル形式（BGRA32）に合わせた1ピクセルあたりのバイト数
pub const BYTES_PER_PIXEL_BGRA: usize = 4;

/// 1枚のカラーフレーム
///
/// チャネル順はBGRA（4バイト）またはBGR（3バイト）。
/// 処理パスの間は不変で、セグメンタには借用で渡す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorFrame {
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
    data: Vec<u8>,
}

impl ColorFrame {
    pub fn new(
        width: u32,
        height: u32,
        bytes_per_pixel: usize,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        if bytes_per_pixel != 3 && bytes_per_pixel != 4 {
            return Err(FrameError::UnsupportedStride(bytes_per_pixel));
        }
        let expected = width as usize * height as usize * bytes_per_pixel;
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                len: data.len(),
                width,
                height,
                bpp: bytes_per_pixel,
            });
        }
        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// ピクセル(x, y)のRGB値。チャネル順はB, G, R(, A)
    pub fn rgb_at(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let i = (y as usize * self.width as usize + x as usize) * self.bytes_per_pixel;
        (self.data[i + 2], self.data[i + 1], self.data[i])
    }
}

/// 深度フレーム
///
/// カラーフレームとは解像度が異なることがあるため、`ratio`
/// （深度解像度 / カラー解像度）による最近傍スケーリングで対応付ける。
/// サンプル値0は無効（深度が取れなかったピクセル）。
#[derive(Debug, Clone)]
pub struct DepthFrame {
    width: u32,
    height: u32,
    samples: Vec<u16>,
    scale_to_meters: f32,
    ratio: f32,
}

impl DepthFrame {
    pub fn new(
        width: u32,
        height: u32,
        samples: Vec<u16>,
        scale_to_meters: f32,
        ratio: f32,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(FrameError::SizeMismatch {
                len: samples.len(),
                width,
                height,
                bpp: 1,
            });
        }
        if !(ratio > 0.0) {
            return Err(FrameError::InvalidRatio);
        }
        Ok(Self {
            width,
            height,
            samples,
            scale_to_meters,
            ratio,
        })
    }

    /// カラーフレームのピクセル座標を深度フレームのインデックスに変換（最近傍）
    pub fn map_color_pixel(&self, pixel: (u32, u32)) -> (u32, u32) {
        let dx = (pixel.0 as f32 * self.ratio).round() as u32;
        let dy = (pixel.1 as f32 * self.ratio).round() as u32;
        (
            dx.min(self.width.saturating_sub(1)),
            dy.min(self.height.saturating_sub(1)),
        )
    }

    /// 深度サンプルをメートルで返す。範囲外・無効サンプルはNone
    pub fn sample_meters(&self, index: (u32, u32)) -> Option<f32> {
        if index.0 >= self.width || index.1 >= self.height {
            return None;
        }
        let raw = self.samples[index.1 as usize * self.width as usize + index.0 as usize];
        if raw == 0 {
            return None;
        }
        Some(raw as f32 * self.scale_to_meters)
    }
}

/// トラッカー1つ分の色受理範囲と追跡パラメータ
///
/// 色相は0〜180スケール、彩度・明度は0〜255スケール。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerQuery {
    pub id: u32,
    pub min_hue: i32,
    pub max_hue: i32,
    pub min_saturation: u8,
    pub min_brightness: u8,
    /// ノイズ除去のための画素面積の下限
    pub min_region_area: u32,
    /// この回数を超えて連続で見失うとLostになる
    pub max_misses: u32,
}

impl TrackerQuery {
    /// 登録時のバリデーション。反転した色相範囲は設定エラーであり、
    /// 偽の「未検出」として扱ってはならない。
    pub fn validate(&self) -> Result<(), ConfigError> {
        for hue in [self.min_hue, self.max_hue] {
            if !(0..=180).contains(&hue) {
                return Err(ConfigError::HueOutOfRange(hue));
            }
        }
        if self.min_hue > self.max_hue {
            return Err(ConfigError::HueRangeReversed {
                min: self.min_hue,
                max: self.max_hue,
            });
        }
        Ok(())
    }
}

/// セグメンタの出力: トラッカーごとの2Dマッチ結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub id: u32,
    pub pixel: Option<(u32, u32)>,
}

impl MatchResult {
    pub fn found(id: u32, x: u32, y: u32) -> Self {
        Self {
            id,
            pixel: Some((x, y)),
        }
    }

    pub fn not_found(id: u32) -> Self {
        Self { id, pixel: None }
    }

    pub fn is_found(&self) -> bool {
        self.pixel.is_some()
    }
}
