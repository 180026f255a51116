//! Canonical rate-limit key builders. Rules are keyed on fixed strings
//! rather than HTTP paths or call sites (see Open Questions, SPEC_FULL.md
//! §9): this is the single place new key shapes get added.

pub fn recovery_user_key(app_id: &str, user_id: &str) -> String {
    format!("recovery:user:{app_id}:{user_id}")
}

/// `recovery:user:{app}:{user}` carries both an hourly and a daily cap
/// (SPEC_FULL.md §4.D); the daily cap needs its own sliding-window counter
/// so a check against one window doesn't consume a slot in the other.
pub fn recovery_user_daily_key(app_id: &str, user_id: &str) -> String {
    format!("recovery:user:{app_id}:{user_id}:daily")
}

pub fn recovery_ip_key(app_id: &str, ip: &str) -> String {
    format!("recovery:ip:{app_id}:{ip}")
}

pub fn phone_send_key(phone: &str) -> String {
    format!("phone:send:{phone}")
}

pub fn phone_verify_key(phone: &str) -> String {
    format!("phone:verify:{phone}")
}

pub fn phone_ip_key(ip: &str) -> String {
    format!("phone:ip:{ip}")
}

pub fn email_send_key(email: &str) -> String {
    format!("email:send:{email}")
}

pub fn policy_evaluation_key(app_id: &str, tenant_org: &str) -> String {
    format!("policy:eval:{app_id}:{tenant_org}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_and_distinct() {
        assert_eq!(recovery_user_key("app1", "u1"), "recovery:user:app1:u1");
        assert_ne!(phone_send_key("+15551234567"), phone_verify_key("+15551234567"));
        assert_ne!(recovery_user_key("app1", "u1"), recovery_user_daily_key("app1", "u1"));
    }
}
