/// The two independently compiled channel programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    /// Classic-mode fragment shader: `void main()` writing `gl_FragColor`,
    /// with `resolution`, `mouse`, `time`, `frame`, `sound`, and
    /// `backbuffer` available.
    Visual,
    /// Sound shader: `vec2 mainSound(float time)` returning a stereo sample.
    Sound,
}

/// Produces a self-contained GLSL fragment shader from raw channel source.
///
/// Steps performed:
///
/// 1. Strip `#version` and `precision` directives plus user re-declarations
///    of the injected uniforms so our own definitions win.
/// 2. Prepend the kind-specific header declaring the uniform block and the
///    classic-mode aliases.
/// 3. For sound shaders, append the footer that samples `mainSound` and
///    packs the stereo result into the PCM texture encoding.
pub fn wrap_shader(kind: ShaderKind, source: &str) -> String {
    let sanitized = sanitize(source);
    match kind {
        ShaderKind::Visual => format!("{VISUAL_HEADER}\n#line 1\n{sanitized}"),
        ShaderKind::Sound => format!("{SOUND_HEADER}\n#line 1\n{sanitized}{SOUND_FOOTER}"),
    }
}

/// Reports whether the raw source samples the backbuffer feedback channel.
///
/// The offscreen backend binds a black placeholder instead of the previous
/// frame, so the build tracker downgrades such shaders to a warning.
pub fn uses_backbuffer(source: &str) -> bool {
    source
        .lines()
        .filter(|line| !is_injected_uniform_decl(line))
        .any(|line| line.contains("backbuffer"))
}

fn sanitize(source: &str) -> String {
    let mut sanitized = String::new();
    let mut skipped_version = false;
    for line in source.lines() {
        let trimmed = line.trim_start();
        if !skipped_version && trimmed.starts_with("#version") {
            skipped_version = true;
            continue;
        }
        if trimmed.starts_with("precision ") {
            continue;
        }
        if is_injected_uniform_decl(line) {
            continue;
        }
        sanitized.push_str(line);
        sanitized.push('\n');
    }
    sanitized
}

fn is_injected_uniform_decl(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("uniform ")
        && INJECTED_UNIFORMS
            .iter()
            .any(|name| trimmed.contains(name))
}

/// Uniform names the header owns; user declarations of these are dropped.
const INJECTED_UNIFORMS: [&str; 6] = [
    "resolution",
    "mouse",
    "time",
    "frame",
    "sound",
    "backbuffer",
];

/// GLSL prologue for visual channel programs.
///
/// The uniform block layout must match `SessionUniforms` in `offscreen.rs`.
/// Classic-mode names are mapped onto the block via macros so user code
/// compiles unchanged.
const VISUAL_HEADER: &str = r"#version 450
layout(location = 0) out vec4 fraglive_FragColor;

layout(std140, set = 0, binding = 0) uniform SessionParams {
    vec2 _resolution;
    vec2 _mouse;
    float _time;
    float _sound;
    int _frame;
    float _padding0;
} ubo;

#define resolution ubo._resolution
#define mouse ubo._mouse
#define time ubo._time
#define sound ubo._sound
#define frame ubo._frame
#define gl_FragColor fraglive_FragColor

layout(set = 1, binding = 0) uniform texture2D fraglive_backbuffer_texture;
layout(set = 1, binding = 1) uniform sampler fraglive_backbuffer_sampler;

#define backbuffer sampler2D(fraglive_backbuffer_texture, fraglive_backbuffer_sampler)
";

/// GLSL prologue for sound channel programs.
///
/// Sound shaders see the session clock as the block offset; the sample rate
/// is fixed at 48 kHz to keep the encoding deterministic.
const SOUND_HEADER: &str = r"#version 450
layout(location = 0) out vec4 fraglive_FragColor;

layout(std140, set = 0, binding = 0) uniform SessionParams {
    vec2 _resolution;
    vec2 _mouse;
    float _time;
    float _sound;
    int _frame;
    float _padding0;
} ubo;

#define blockOffset ubo._time
#define sampleRate 48000.0
";

/// Sound epilogue: evaluate `mainSound` once per texel and pack the stereo
/// sample into two 16-bit little-endian channels.
const SOUND_FOOTER: &str = r"void main() {
    float t = blockOffset
        + (floor(gl_FragCoord.y) * ubo._resolution.x + floor(gl_FragCoord.x)) / sampleRate;
    vec2 pcm = clamp(mainSound(t), -1.0, 1.0);
    vec2 v = floor((0.5 + 0.5 * pcm) * 65536.0);
    vec2 lo = mod(v, 256.0) / 255.0;
    vec2 hi = floor(v / 256.0) / 255.0;
    fraglive_FragColor = vec4(lo.x, hi.x, lo.y, hi.y);
}
";

/// Minimal full-screen triangle vertex shader shared by both kinds.
pub(crate) const VERTEX_SHADER_GLSL: &str = r"#version 450
const vec2 corners[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    gl_Position = vec4(corners[uint(gl_VertexIndex)], 0.0, 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_strips_classic_uniforms() {
        let source = r#"
            #version 300 es
            precision highp float;
            uniform vec2 resolution;
            uniform float time;
            void main() {
                gl_FragColor = vec4(gl_FragCoord.xy / resolution, sin(time), 1.0);
            }
        "#;

        let wrapped = wrap_shader(ShaderKind::Visual, source);
        assert!(!wrapped.contains("uniform vec2 resolution"));
        assert!(!wrapped.contains("uniform float time"));
        assert!(!wrapped.contains("precision highp"));
        assert!(wrapped.contains("#define resolution"));
        assert_eq!(wrapped.matches("#version").count(), 1);
    }

    #[test]
    fn sound_wrap_appends_pcm_footer() {
        let source = "vec2 mainSound(float t) { return vec2(sin(6.2831 * 440.0 * t)); }";
        let wrapped = wrap_shader(ShaderKind::Sound, source);
        assert!(wrapped.contains("mainSound"));
        assert!(wrapped.contains("blockOffset"));
        assert!(wrapped.trim_end().ends_with('}'));
    }

    #[test]
    fn backbuffer_detection_ignores_stripped_declaration() {
        let declared_only = "uniform sampler2D backbuffer;\nvoid main(){ gl_FragColor = vec4(0.0); }";
        assert!(!uses_backbuffer(declared_only));

        let sampled = "uniform sampler2D backbuffer;\nvoid main(){ gl_FragColor = texture(backbuffer, vec2(0.5)); }";
        assert!(uses_backbuffer(sampled));
    }
}
