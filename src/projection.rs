use nalgebra::{Matrix4, Vector3, Vector4};

use crate::config::FallbackConfig;
use crate::error::GeometryError;

/// 1フレーム分のカメラ姿勢
///
/// camera-to-world変換と射影行列は必ずペアで渡す。構築時に両方を検証するため、
/// 片方だけ更新された中途半端な値（ゼロ行列など）はプロジェクタに届かない。
/// フレームと一緒に値渡しされ、構築後は不変。
#[derive(Debug, Clone)]
pub struct WorldPose {
    camera_to_world: Matrix4<f32>,
    projection: Matrix4<f32>,
    projection_inv: Matrix4<f32>,
    camera_origin: Vector3<f32>,
}

impl WorldPose {
    pub fn new(
        camera_to_world: Matrix4<f32>,
        projection: Matrix4<f32>,
    ) -> Result<Self, GeometryError> {
        let projection_inv = projection
            .try_inverse()
            .ok_or(GeometryError::SingularProjection)?;
        if camera_to_world.try_inverse().is_none() {
            return Err(GeometryError::SingularTransform);
        }

        let o = camera_to_world * Vector4::new(0.0, 0.0, 0.0, 1.0);
        let camera_origin = Vector3::new(o[0], o[1], o[2]);

        Ok(Self {
            camera_to_world,
            projection,
            projection_inv,
            camera_origin,
        })
    }

    pub fn camera_to_world(&self) -> &Matrix4<f32> {
        &self.camera_to_world
    }

    pub fn projection(&self) -> &Matrix4<f32> {
        &self.projection
    }

    /// カメラのワールド原点
    pub fn camera_origin(&self) -> Vector3<f32> {
        self.camera_origin
    }

    /// カメラ前方（カメラ空間-Z軸）のワールド方向
    pub fn forward(&self) -> Vector3<f32> {
        let f = self.camera_to_world * Vector4::new(0.0, 0.0, -1.0, 0.0);
        Vector3::new(f[0], f[1], f[2]).normalize()
    }
}

/// カメラ原点からピクセルを通るワールド空間レイ
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vector3<f32>,
    /// 正規化済み
    pub direction: Vector3<f32>,
}

/// ピクセルを逆射影してワールド空間レイを作る
///
/// ピクセル中心(+0.5)をNDCに写し、射影行列の逆行列でカメラ空間へ、
/// camera-to-worldでワールドへ変換する。
pub fn project(pixel: (u32, u32), pose: &WorldPose, resolution: (u32, u32)) -> Option<Ray> {
    let (w, h) = resolution;
    if w == 0 || h == 0 {
        return None;
    }

    let nx = 2.0 * (pixel.0 as f32 + 0.5) / w as f32 - 1.0;
    // 画像のYは下向き、NDCのYは上向き
    let ny = 1.0 - 2.0 * (pixel.1 as f32 + 0.5) / h as f32;

    let v = pose.projection_inv * Vector4::new(nx, ny, 0.5, 1.0);
    if v[3].abs() < 1e-9 {
        return None;
    }
    let p_cam = Vector3::new(v[0] / v[3], v[1] / v[3], v[2] / v[3]);
    let norm = p_cam.norm();
    if norm < 1e-9 {
        return None;
    }
    let dir_cam = p_cam / norm;

    let d = pose.camera_to_world * Vector4::new(dir_cam[0], dir_cam[1], dir_cam[2], 0.0);
    let direction = Vector3::new(d[0], d[1], d[2]);
    let dn = direction.norm();
    if dn < 1e-9 {
        return None;
    }

    Some(Ray {
        origin: pose.camera_origin(),
        direction: direction / dn,
    })
}

/// レイを3D位置に解決するプロジェクタ
///
/// 深度サンプルがあればレイ上の実測距離、なければ前回位置を中心とした
/// 球との交差で近似する。
#[derive(Debug, Clone)]
pub struct Projector {
    sphere_radius: f32,
    forward_offset: f32,
}

impl Projector {
    pub fn new(sphere_radius: f32, forward_offset: f32) -> Self {
        Self {
            sphere_radius,
            forward_offset,
        }
    }

    pub fn from_config(config: &FallbackConfig) -> Self {
        Self::new(config.sphere_radius, config.forward_offset)
    }

    /// 深度ソースの実測距離（メートル）による解決
    pub fn resolve_with_depth(&self, ray: &Ray, depth_meters: f32) -> Vector3<f32> {
        ray.origin + ray.direction * depth_meters
    }

    /// 球フォールバックによる解決
    ///
    /// 球中心は前回位置をカメラ前方にオフセットした点。逆向きレイで
    /// カメラに最も近い交点、すなわち順方向レイの遠い方の交点を採用する。
    /// 深度ソースがなく、有効な前回位置がある場合のみ使える近似。
    pub fn resolve_with_sphere(
        &self,
        ray: &Ray,
        pose: &WorldPose,
        seed: &Vector3<f32>,
    ) -> Option<Vector3<f32>> {
        let center = seed + pose.forward() * self.forward_offset;
        let r = self.sphere_radius;

        // |o + t*d - c|^2 = r^2 を解く（dは正規化済み）
        let oc = ray.origin - center;
        let b = oc.dot(&ray.direction);
        let c = oc.dot(&oc) - r * r;
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }

        let t = -b + disc.sqrt();
        if t <= 0.0 {
            return None;
        }
        Some(ray.origin + ray.direction * t)
    }
}
