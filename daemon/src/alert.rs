//! Alert message text (Slack-flavoured markdown).

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::watcher::{LoginEvent, LogoutEvent};

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn login_message(vm_name: &str, event: &LoginEvent) -> String {
    format!(
        ":rotating_light: *{}* remote session request detected\nUser: {}\nID: {}\nTime: {} (UTC)\nSource: {}",
        vm_name,
        event.user_name,
        event.user_id,
        rfc3339(event.timestamp),
        event.source
    )
}

pub fn logout_message(vm_name: &str, event: &LogoutEvent) -> String {
    format!(
        ":white_check_mark: *{}* remote session closed (logout)\nTime: {} (UTC)",
        vm_name,
        rfc3339(event.timestamp)
    )
}

pub fn file_change_message(
    vm_name: &str,
    path: &Path,
    user: &str,
    at: DateTime<Utc>,
    diff: &str,
) -> String {
    format!(
        ":warning: *Configuration file changed on {}*\nFile: `{}`\nModified by: {}\nTime: {} (UTC)\n\n*Changes:*\n```\n{}\n```",
        vm_name,
        path.display(),
        user,
        rfc3339(at),
        diff.trim_end()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn login_message_carries_identity() {
        let msg = login_message(
            "vm-7",
            &LoginEvent {
                user_name: "alice".into(),
                user_id: "ID123".into(),
                timestamp: at(),
                source: "Login Track".into(),
            },
        );
        assert!(msg.contains("*vm-7*"));
        assert!(msg.contains("User: alice"));
        assert!(msg.contains("ID: ID123"));
        assert!(msg.contains("2025-01-01T12:00:00Z"));
        assert!(msg.contains("Source: Login Track"));
    }

    #[test]
    fn file_change_message_fences_diff() {
        let msg = file_change_message("vm-7", Path::new("/etc/user.yml"), "bob", at(), "+ a: 1\n");
        assert!(msg.contains("File: `/etc/user.yml`"));
        assert!(msg.contains("Modified by: bob"));
        assert!(msg.ends_with("```\n+ a: 1\n```"));
    }
}
