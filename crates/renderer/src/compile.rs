use wgpu::naga::front::glsl::{Frontend, Options};
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};
use wgpu::naga::ShaderStage;

use crate::handle::BuildReport;
use crate::source::{uses_backbuffer, wrap_shader, ShaderKind};

/// Compiles one channel's source headlessly and classifies the outcome.
///
/// The wrapped program is parsed with naga's GLSL frontend and validated the
/// same way the GPU backend will see it, so the report matches what a later
/// pipeline build produces. Parse and validation failures map to
/// [`BuildStatus::Error`]; a clean build that samples the backbuffer maps to
/// [`BuildStatus::Warning`] because the offscreen surface feeds it a black
/// placeholder instead of the previous frame.
///
/// [`BuildStatus::Error`]: crate::BuildStatus::Error
/// [`BuildStatus::Warning`]: crate::BuildStatus::Warning
pub fn compile_report(kind: ShaderKind, source: &str) -> BuildReport {
    let wrapped = wrap_shader(kind, source);

    let mut frontend = Frontend::default();
    let module = match frontend.parse(&Options::from(ShaderStage::Fragment), &wrapped) {
        Ok(module) => module,
        Err(errors) => {
            return BuildReport::error(errors.emit_to_string(&wrapped));
        }
    };

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    if let Err(error) = validator.validate(&module) {
        return BuildReport::error(error.emit_to_string(&wrapped));
    }

    if kind == ShaderKind::Visual && uses_backbuffer(source) {
        return BuildReport::warning(
            "backbuffer is bound to a black placeholder offscreen; feedback is unavailable",
        );
    }

    BuildReport::ready("ready")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::BuildStatus;

    const VALID_VISUAL: &str = r"
        void main() {
            vec2 uv = gl_FragCoord.xy / resolution;
            gl_FragColor = vec4(uv, 0.5 + 0.5 * sin(time), 1.0);
        }
    ";

    #[test]
    fn valid_visual_source_is_ready() {
        let report = compile_report(ShaderKind::Visual, VALID_VISUAL);
        assert_eq!(report.status, BuildStatus::Ready, "{}", report.message);
    }

    #[test]
    fn syntax_error_reports_error_status() {
        let report = compile_report(ShaderKind::Visual, "void main() { gl_FragColor = ; }");
        assert_eq!(report.status, BuildStatus::Error);
        assert!(!report.message.is_empty());
    }

    #[test]
    fn missing_main_reports_error_status() {
        let report = compile_report(
            ShaderKind::Visual,
            "vec3 palette(float t) { return vec3(t); }",
        );
        assert_eq!(report.status, BuildStatus::Error);
    }

    #[test]
    fn backbuffer_sampling_downgrades_to_warning() {
        let source = r"
            void main() {
                vec4 previous = texture(backbuffer, gl_FragCoord.xy / resolution);
                gl_FragColor = previous * 0.95;
            }
        ";
        let report = compile_report(ShaderKind::Visual, source);
        assert_eq!(report.status, BuildStatus::Warning);
    }

    #[test]
    fn valid_sound_source_is_ready() {
        let source = "vec2 mainSound(float t) { return vec2(sin(6.2831 * 440.0 * t)) * 0.5; }";
        let report = compile_report(ShaderKind::Sound, source);
        assert_eq!(report.status, BuildStatus::Ready, "{}", report.message);
    }

    #[test]
    fn sound_source_without_main_sound_errors() {
        let report = compile_report(ShaderKind::Sound, "float half_(float t) { return t * 0.5; }");
        assert_eq!(report.status, BuildStatus::Error);
    }
}
