pub const MAX_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_WECHAT_ID_LEN: usize = 100;
pub const MAX_TOPIC_LEN: usize = 2_000;
pub const MAX_ID_LEN: usize = 128;

/// Upper bound on any JSON request body.
pub const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;
