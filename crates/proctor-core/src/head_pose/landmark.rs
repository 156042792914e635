//! Geometric head pose from five facial landmarks.
//!
//! Fits a weak-perspective projection of a rigid 3D face model onto the
//! detected landmarks by least squares, recovers the rotation and reads off
//! yaw and pitch.
//!
//! Model frame: x to the image right, y down, z away from the camera, so the
//! nose tip is the point closest to the lens.

use crate::config::HeadPoseThresholds;
use crate::types::Direction;

/// Generic face model in millimetres, nose tip at the origin.
/// Order matches detector landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
const FACE_MODEL_3D: [[f32; 3]; 5] = [
    [-30.0, -32.7, 26.0],
    [30.0, -32.7, 26.0],
    [0.0, 0.0, 0.0],
    [-28.9, 28.9, 24.1],
    [28.9, 28.9, 24.1],
];

const EPS: f32 = 1e-6;
/// Angles in degrees at which the solver's confidence saturates.
const YAW_FULL_CONFIDENCE: f32 = 40.0;
const PITCH_FULL_CONFIDENCE: f32 = 30.0;

/// Head rotation in degrees, in image terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseAngles {
    /// Positive when the face turns toward the image right.
    pub yaw: f32,
    /// Positive when the face tilts down.
    pub pitch: f32,
}

/// Estimate yaw and pitch from five landmarks.
///
/// Returns `None` for degenerate input (collapsed or collinear landmarks).
pub fn solve_pose(landmarks: &[(f32, f32); 5]) -> Option<PoseAngles> {
    let model_mean = mean3(&FACE_MODEL_3D);
    let image_mean = {
        let (sx, sy) = landmarks.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / 5.0, sy / 5.0)
    };

    // Normal equations: (PᵀP) m_r = Pᵀ u_r for each image axis r.
    let mut ptp = [[0.0f32; 3]; 3];
    let mut ptu = [[0.0f32; 3]; 2];
    for (p, &(u, v)) in FACE_MODEL_3D.iter().zip(landmarks.iter()) {
        let c = [p[0] - model_mean[0], p[1] - model_mean[1], p[2] - model_mean[2]];
        let uv = [u - image_mean.0, v - image_mean.1];
        for j in 0..3 {
            for k in 0..3 {
                ptp[j][k] += c[j] * c[k];
            }
            for (r, &val) in uv.iter().enumerate() {
                ptu[r][j] += c[j] * val;
            }
        }
    }

    let m0 = solve_3x3(&ptp, &ptu[0])?;
    let m1 = solve_3x3(&ptp, &ptu[1])?;

    let n0 = norm(&m0);
    let n1 = norm(&m1);
    if n0 < EPS || n1 < EPS {
        return None;
    }
    let r0 = scale(&m0, 1.0 / n0);
    let r1 = scale(&m1, 1.0 / n1);

    // Split the non-orthogonality evenly between the two rows, then finish
    // with one Gram-Schmidt step so the basis is exactly orthonormal.
    let e = dot(&r0, &r1);
    let a0 = normalize(&sub(&r0, &scale(&r1, e / 2.0)))?;
    let a1 = sub(&r1, &scale(&r0, e / 2.0));
    let r0 = a0;
    let r1 = normalize(&sub(&a1, &scale(&r0, dot(&a1, &r0))))?;
    let r2 = cross(&r0, &r1);

    // Euler decomposition R = Rz · Ry · Rx.
    let sy = (r0[0] * r0[0] + r1[0] * r1[0]).sqrt();
    let (x, y) = if sy > EPS {
        (r2[1].atan2(r2[2]), (-r2[0]).atan2(sy))
    } else {
        ((-r1[2]).atan2(r1[1]), (-r2[0]).atan2(sy))
    };

    Some(PoseAngles {
        yaw: -y.to_degrees(),
        pitch: x.to_degrees(),
    })
}

/// Map solver angles to a direction and a magnitude-based confidence.
///
/// Yaw wins over pitch. Confidence reaches 1.0 at 40° yaw or 30° pitch,
/// independent of the direction thresholds.
pub fn classify_angles(angles: PoseAngles, thresholds: &HeadPoseThresholds) -> (Direction, f32) {
    let yaw_t = thresholds.yaw_degrees;
    let pitch_t = thresholds.pitch_degrees;

    let direction = if angles.yaw <= -yaw_t {
        Direction::Left
    } else if angles.yaw >= yaw_t {
        Direction::Right
    } else if angles.pitch >= pitch_t {
        Direction::Down
    } else if angles.pitch <= -pitch_t {
        Direction::Up
    } else {
        Direction::Forward
    };

    let magnitude = (angles.yaw.abs() / YAW_FULL_CONFIDENCE).max(angles.pitch.abs() / PITCH_FULL_CONFIDENCE);
    (direction, magnitude.clamp(0.0, 1.0))
}

fn mean3(points: &[[f32; 3]; 5]) -> [f32; 3] {
    let mut m = [0.0f32; 3];
    for p in points {
        for k in 0..3 {
            m[k] += p[k] / points.len() as f32;
        }
    }
    m
}

/// Solve a 3×3 linear system by Cramer's rule.
fn solve_3x3(a: &[[f32; 3]; 3], b: &[f32; 3]) -> Option<[f32; 3]> {
    let det = det3(a);
    if det.abs() < EPS {
        return None;
    }
    let mut x = [0.0f32; 3];
    for (col, xi) in x.iter_mut().enumerate() {
        let mut m = *a;
        for row in 0..3 {
            m[row][col] = b[row];
        }
        *xi = det3(&m) / det;
    }
    Some(x)
}

fn det3(m: &[[f32; 3]; 3]) -> f32 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn dot(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: &[f32; 3]) -> f32 {
    dot(a, a).sqrt()
}

fn scale(a: &[f32; 3], s: f32) -> [f32; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn sub(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn normalize(a: &[f32; 3]) -> Option<[f32; 3]> {
    let n = norm(a);
    (n > EPS).then(|| scale(a, 1.0 / n))
}

fn cross(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
