//! Shared GLSL helpers that transform bodies may call.
//!
//! Listed in dependency order: a helper only calls helpers that appear before it.

use super::utils::contains_ident;

/// A named helper function emitted ahead of the transform functions.
#[derive(Clone, Copy, Debug)]
pub struct UtilityFunction {
    pub name: &'static str,
    pub glsl: &'static str,
}

pub const UTILITIES: &[UtilityFunction] = &[
    UtilityFunction {
        name: "permute",
        glsl: r#"vec4 permute(vec4 x) {
  return mod(((x * 34.0) + 1.0) * x, 289.0);
}
"#,
    },
    UtilityFunction {
        name: "taylorInvSqrt",
        glsl: r#"vec4 taylorInvSqrt(vec4 r) {
  return 1.79284291400159 - 0.85373472095314 * r;
}
"#,
    },
    UtilityFunction {
        name: "_luminance",
        glsl: r#"float _luminance(vec3 rgb) {
  const vec3 W = vec3(0.2125, 0.7154, 0.0721);
  return dot(rgb, W);
}
"#,
    },
    UtilityFunction {
        name: "_rgbToHsv",
        glsl: r#"vec3 _rgbToHsv(vec3 c) {
  vec4 K = vec4(0.0, -1.0 / 3.0, 2.0 / 3.0, -1.0);
  vec4 p = mix(vec4(c.bg, K.wz), vec4(c.gb, K.xy), step(c.b, c.g));
  vec4 q = mix(vec4(p.xyw, c.r), vec4(c.r, p.yzx), step(p.x, c.r));
  float d = q.x - min(q.w, q.y);
  float e = 1.0e-10;
  return vec3(abs(q.z + (q.w - q.y) / (6.0 * d + e)), d / (q.x + e), q.x);
}
"#,
    },
    UtilityFunction {
        name: "_hsvToRgb",
        glsl: r#"vec3 _hsvToRgb(vec3 c) {
  vec4 K = vec4(1.0, 2.0 / 3.0, 1.0 / 3.0, 3.0);
  vec3 p = abs(fract(c.xxx + K.xyz) * 6.0 - K.www);
  return c.z * mix(K.xxx, clamp(p - K.xxx, 0.0, 1.0), c.y);
}
"#,
    },
    // 3D simplex noise (Ashima Arts / Stefan Gustavson, MIT).
    UtilityFunction {
        name: "_noise",
        glsl: r#"float _noise(vec3 v) {
  const vec2 C = vec2(1.0 / 6.0, 1.0 / 3.0);
  const vec4 D = vec4(0.0, 0.5, 1.0, 2.0);

  vec3 i = floor(v + dot(v, C.yyy));
  vec3 x0 = v - i + dot(i, C.xxx);

  vec3 g = step(x0.yzx, x0.xyz);
  vec3 l = 1.0 - g;
  vec3 i1 = min(g.xyz, l.zxy);
  vec3 i2 = max(g.xyz, l.zxy);

  vec3 x1 = x0 - i1 + 1.0 * C.xxx;
  vec3 x2 = x0 - i2 + 2.0 * C.xxx;
  vec3 x3 = x0 - 1.0 + 3.0 * C.xxx;

  i = mod(i, 289.0);
  vec4 p = permute(permute(permute(
      i.z + vec4(0.0, i1.z, i2.z, 1.0))
    + i.y + vec4(0.0, i1.y, i2.y, 1.0))
    + i.x + vec4(0.0, i1.x, i2.x, 1.0));

  float n_ = 1.0 / 7.0;
  vec3 ns = n_ * D.wyz - D.xzx;

  vec4 j = p - 49.0 * floor(p * ns.z * ns.z);
  vec4 x_ = floor(j * ns.z);
  vec4 y_ = floor(j - 7.0 * x_);

  vec4 x = x_ * ns.x + ns.yyyy;
  vec4 y = y_ * ns.x + ns.yyyy;
  vec4 h = 1.0 - abs(x) - abs(y);

  vec4 b0 = vec4(x.xy, y.xy);
  vec4 b1 = vec4(x.zw, y.zw);
  vec4 s0 = floor(b0) * 2.0 + 1.0;
  vec4 s1 = floor(b1) * 2.0 + 1.0;
  vec4 sh = -step(h, vec4(0.0));

  vec4 a0 = b0.xzyw + s0.xzyw * sh.xxyy;
  vec4 a1 = b1.xzyw + s1.xzyw * sh.zzww;

  vec3 p0 = vec3(a0.xy, h.x);
  vec3 p1 = vec3(a0.zw, h.y);
  vec3 p2 = vec3(a1.xy, h.z);
  vec3 p3 = vec3(a1.zw, h.w);

  vec4 norm = taylorInvSqrt(vec4(dot(p0, p0), dot(p1, p1), dot(p2, p2), dot(p3, p3)));
  p0 *= norm.x;
  p1 *= norm.y;
  p2 *= norm.z;
  p3 *= norm.w;

  vec4 m = max(0.6 - vec4(dot(x0, x0), dot(x1, x1), dot(x2, x2), dot(x3, x3)), 0.0);
  m = m * m;
  return 42.0 * dot(m * m, vec4(dot(p0, x0), dot(p1, x1), dot(p2, x2), dot(p3, x3)));
}
"#,
    },
];

/// Helpers referenced (directly or through other helpers) by any of `sources`, in
/// emission order.
pub fn referenced_utilities(sources: &[&str]) -> Vec<&'static UtilityFunction> {
    let mut needed = vec![false; UTILITIES.len()];
    for (i, util) in UTILITIES.iter().enumerate().rev() {
        let used_by_source = sources.iter().any(|s| contains_ident(s, util.name));
        let used_by_helper = UTILITIES
            .iter()
            .zip(&needed)
            .skip(i + 1)
            .any(|(other, &on)| on && contains_ident(other.glsl, util.name));
        needed[i] = used_by_source || used_by_helper;
    }
    UTILITIES
        .iter()
        .zip(needed)
        .filter_map(|(util, on)| on.then_some(util))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(sources: &[&str]) -> Vec<&'static str> {
        referenced_utilities(sources)
            .into_iter()
            .map(|u| u.name)
            .collect()
    }

    #[test]
    fn nothing_referenced_nothing_emitted() {
        assert!(names(&["return vec4(1.0);"]).is_empty());
    }

    #[test]
    fn noise_pulls_in_its_helpers_first() {
        assert_eq!(
            names(&["return vec4(vec3(_noise(vec3(_st, 0.0))), 1.0);"]),
            vec!["permute", "taylorInvSqrt", "_noise"]
        );
    }

    #[test]
    fn color_helpers_are_independent() {
        assert_eq!(
            names(&[
                "vec3 c = _rgbToHsv(_c0.rgb);",
                "return vec4(_hsvToRgb(c), 1.0);"
            ]),
            vec!["_rgbToHsv", "_hsvToRgb"]
        );
        assert_eq!(names(&["_luminance(_c0.rgb)"]), vec!["_luminance"]);
    }

    #[test]
    fn helpers_only_call_earlier_helpers() {
        for (i, util) in UTILITIES.iter().enumerate() {
            for later in &UTILITIES[i + 1..] {
                assert!(
                    !contains_ident(util.glsl, later.name),
                    "{} calls {}, which is emitted after it",
                    util.name,
                    later.name
                );
            }
        }
    }
}
