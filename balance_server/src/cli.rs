use std::{env, env::VarError};

/// The server takes no arguments. Any argument prints the help text and the current configuration instead, and the
/// caller should exit.
pub fn handle_command_line_args() -> bool {
    if env::args().len() <= 1 {
        return false;
    }
    println!("\n{}\n", include_str!("./cli-help.txt"));
    display_envs();
    true
}

// Only variables that never hold credentials.
const DISPLAY_ENVS: [&str; 18] = [
    "RUST_LOG",
    "BAL_HOST",
    "BAL_PORT",
    "BAL_DATABASE_URL",
    "BAL_DB_MAX_CONNECTIONS",
    "BAL_SHOPEE_HOST",
    "BAL_SHOPEE_PARTNER_ID",
    "BAL_SHOPEE_RATE_LIMIT",
    "BAL_SHOPEE_MAX_RETRIES",
    "BAL_SHOPEE_RETRY_INTERVAL_MS",
    "BAL_WEBHOOK_HMAC_CHECKS",
    "BAL_WEBHOOK_URL",
    "BAL_SYNC_WORKERS",
    "BAL_FINANCE_WORKERS",
    "BAL_SYNC_INTERVAL_MIN",
    "BAL_FINANCE_INTERVAL_MIN",
    "BAL_ADJUSTMENT_POLICY",
    "BAL_DISABLE_WORKERS",
];

fn display_envs() {
    println!("Configuration (secrets omitted):");
    for name in DISPLAY_ENVS {
        let value = match env::var(name) {
            Ok(v) => v,
            Err(VarError::NotPresent) => "<default>".to_string(),
            Err(VarError::NotUnicode(v)) => format!("<not unicode: {}>", v.to_string_lossy()),
        };
        println!("  {name:<32} {value}");
    }
}

#[cfg(test)]
mod test {
    use super::DISPLAY_ENVS;

    #[test]
    fn secrets_are_never_displayed() {
        for secret in ["BAL_SHOPEE_PARTNER_KEY", "BAL_ADMIN_TOKEN", "BAL_REDIS_URL"] {
            assert!(!DISPLAY_ENVS.contains(&secret), "{secret} must not be printed");
        }
    }
}
