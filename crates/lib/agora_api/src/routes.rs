//! Route paths.

pub const GET_API_HEALTH: &str = "/api/health";

pub const POST_AUTH_REGISTER: &str = "/auth/register";
pub const POST_AUTH_LOGIN: &str = "/auth/login";
pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
pub const POST_AUTH_LOGOUT_ALL: &str = "/auth/logout-all";
pub const GET_AUTH_ME: &str = "/auth/me";
pub const POST_AUTH_RESET_PASSWORD: &str = "/auth/reset-password";
pub const POST_AUTH_REQUEST_PASSWORD_RESET: &str = "/auth/request-password-reset";
pub const POST_AUTH_VERIFY_RESET_CODE: &str = "/auth/verify-reset-code";
pub const POST_AUTH_CONFIRM_PASSWORD_RESET: &str = "/auth/confirm-password-reset";
