use crate::segment::mask::Mask;

/// マスクの連結成分（輪郭）1つ分の統計
///
/// 連結性は膨張後のマスクで判定するが、面積と重心は
/// しきい値マスク（support）の画素だけで測る。膨張は小さい実物体が
/// 収縮で消えないよう領域をつなぐ役割で、面積下限の判定対象ではない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// しきい値マスク上の画素数
    pub area: u32,
    sum_x: u64,
    sum_y: u64,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Region {
    /// 一次モーメント / 面積による重心
    pub fn centroid(&self) -> (u32, u32) {
        if self.area == 0 {
            return (self.min_x, self.min_y);
        }
        (
            (self.sum_x / self.area as u64) as u32,
            (self.sum_y / self.area as u64) as u32,
        )
    }
}

/// 膨張済みマスクの連結成分を抽出する（8近傍）
///
/// `support` はしきい値処理直後のマスク。各成分の面積・重心は
/// 成分内に含まれるsupport画素で集計する。
pub fn find_regions(dilated: &Mask, support: &Mask) -> Vec<Region> {
    let w = dilated.width();
    let h = dilated.height();
    let mut visited = vec![false; w * h];
    let mut regions = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for sy in 0..h {
        for sx in 0..w {
            if visited[sy * w + sx] || !dilated.get(sx, sy) {
                continue;
            }

            let mut region = Region {
                area: 0,
                sum_x: 0,
                sum_y: 0,
                min_x: sx as u32,
                min_y: sy as u32,
                max_x: sx as u32,
                max_y: sy as u32,
            };

            visited[sy * w + sx] = true;
            stack.push((sx, sy));

            while let Some((x, y)) = stack.pop() {
                region.min_x = region.min_x.min(x as u32);
                region.min_y = region.min_y.min(y as u32);
                region.max_x = region.max_x.max(x as u32);
                region.max_y = region.max_y.max(y as u32);

                if support.get(x, y) {
                    region.area += 1;
                    region.sum_x += x as u64;
                    region.sum_y += y as u64;
                }

                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = x as i64 + dx;
                        let ny = y as i64 + dy;
                        if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                            continue;
                        }
                        let (nx, ny) = (nx as usize, ny as usize);
                        if !visited[ny * w + nx] && dilated.get(nx, ny) {
                            visited[ny * w + nx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            regions.push(region);
        }
    }
    regions
}

/// 面積下限を満たす成分のうち最大のものを返す
/// 面積がちょうどmin_areaの成分は受理する（off-by-oneなし）
pub fn largest_above(regions: &[Region], min_area: u32) -> Option<&Region> {
    regions
        .iter()
        .filter(|r| r.area >= min_area)
        .max_by_key(|r| r.area)
}
