/// The one formatting primitive every kernel failure funnels through.
pub fn pcm_error_message(msg: &str, err: impl std::fmt::Display) -> String {
    format!("{msg}: {err}")
}

pub fn device_open_error(path: &str, err: impl std::fmt::Display) -> String {
    pcm_error_message(&format!("cannot open device '{path}'"), err)
}
