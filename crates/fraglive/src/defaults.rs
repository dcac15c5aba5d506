//! Built-in channel sources used when no files are supplied.

/// Visual program rendered on a bare `fraglive` start.
pub const DEFAULT_VISUAL_SOURCE: &str = r"void main() {
    vec2 uv = (gl_FragCoord.xy * 2.0 - resolution) / min(resolution.x, resolution.y);
    float ring = abs(length(uv) - 0.5 - 0.2 * sin(time)) * 8.0;
    vec3 color = vec3(0.1, 0.4, 0.8) / max(ring, 0.1) * (1.0 + sound);
    gl_FragColor = vec4(color, 1.0);
}
";

/// Sound program compiled when the audio channel is enabled without a file.
pub const DEFAULT_SOUND_SOURCE: &str = r"vec2 mainSound(float t) {
    return vec2(sin(6.283185 * 440.0 * t) * exp(-3.0 * fract(t)));
}
";
