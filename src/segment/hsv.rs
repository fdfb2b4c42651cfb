//! RGB→HSV変換
//!
//! 色相はクエリ範囲と同じ0〜180スケール（360度の半分、OpenCV互換）、
//! 彩度・明度は0〜255スケールで返す。

/// 1ピクセルをHSVに変換する
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let rf = r as f32;
    let gf = g as f32;
    let bf = b as f32;

    let c_max = rf.max(gf).max(bf);
    let c_min = rf.min(gf).min(bf);
    let delta = c_max - c_min;

    let mut hue_deg = 0.0f32;
    if delta > 0.0 {
        if c_max == rf {
            hue_deg = 60.0 * (((gf - bf) / delta) % 6.0);
        } else if c_max == gf {
            hue_deg = 60.0 * ((bf - rf) / delta + 2.0);
        } else {
            hue_deg = 60.0 * ((rf - gf) / delta + 4.0);
        }
    }
    if hue_deg < 0.0 {
        hue_deg += 360.0;
    }

    let saturation = if c_max > 0.0 {
        (delta / c_max * 255.0).round()
    } else {
        0.0
    };

    // 0〜360度 → 0〜180
    ((hue_deg / 2.0).round() as u8, saturation as u8, c_max as u8)
}
