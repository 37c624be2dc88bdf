use crate::format::VideoFormat;
use crate::source::Source;

/// Decoder output target: its standard output.
pub const OUTPUT_TARGET: &str = "pipe:1";

/// Build the decoder argument vector for `source` decoded into `format`.
///
/// Protocol flags come first, then the input, the raw-video output settings,
/// the optional frame rate and filter graph, and finally the stream toggles and
/// output target. The filter is passed as a single argument; the decoder is
/// spawned without a shell, so it needs no quoting.
pub fn build_arguments(source: &Source, format: &VideoFormat, filter: Option<&str>) -> Vec<String> {
    let mut arguments = Vec::with_capacity(16);

    match source {
        Source::Rtsp(rtsp) => {
            arguments.push("-rtsp_transport".to_string());
            arguments.push(rtsp.transport().as_str().to_string());
        }
    }

    arguments.extend([
        "-i".to_string(),
        source.url().to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        format.pixel_format().as_str().to_string(),
    ]);

    if let Some(fps) = format.fps() {
        arguments.push("-r".to_string());
        arguments.push(fps.to_string());
    }

    if let Some(filter) = filter.filter(|filter| !filter.trim().is_empty()) {
        arguments.push("-vf".to_string());
        arguments.push(filter.to_string());
    }

    arguments.extend([
        "-an".to_string(),
        "-sn".to_string(),
        OUTPUT_TARGET.to_string(),
    ]);

    arguments
}
