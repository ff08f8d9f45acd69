use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_V1_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

fn v1(base: &str, suffix: &str) -> String {
    base_join(base, &format!("{}/{}", API_V1_PREFIX, suffix))
}

pub fn auth_logout(base: &str) -> String {
    v1(base, "auth/logout")
}
pub fn student(base: &str, student_id: &str) -> String {
    v1(base, &format!("students/{}", enc(student_id)))
}
pub fn uploads(base: &str) -> String {
    v1(base, "uploads")
}
pub fn export_csv(base: &str) -> String {
    v1(base, "export/csv")
}
pub fn charts(base: &str) -> String {
    v1(base, "charts")
}
