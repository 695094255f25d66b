pub const STATUS_LABEL: &[&str] = &["status"];
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

pub fn status_value(is_ok: bool) -> &'static str {
    if is_ok {
        STATUS_SUCCESS
    } else {
        STATUS_ERROR
    }
}
