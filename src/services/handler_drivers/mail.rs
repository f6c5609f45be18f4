//! Mail driver (C7): batches a group of mail-context timer entries
//! into one `mail` invocation, per §4.5/§6.

use std::collections::BTreeSet;

use crate::domain::error::DriverError;
use crate::services::process_pool::CommandContext;

/// One task/event pair contributing to a mail batch.
#[derive(Debug, Clone)]
pub struct MailEntry {
    /// `<point>/<name>/<submit>` rendering.
    pub task_id_str: String,
    pub event: String,
}

pub struct MailDriver {
    pub suite: String,
    pub mail_from: String,
    pub mail_to: String,
    pub mail_smtp: Option<String>,
    pub host: String,
    pub port: String,
    pub owner: String,
    /// Optional footer template with `%{host,port,owner,suite}`
    /// substitution.
    pub footer_template: Option<String>,
}

impl MailDriver {
    fn subject(&self, entries: &[MailEntry]) -> String {
        let tasks: BTreeSet<&str> = entries.iter().map(|e| e.task_id_str.as_str()).collect();
        let events: BTreeSet<&str> = entries.iter().map(|e| e.event.as_str()).collect();

        let body = if tasks.len() == 1 && events.len() == 1 {
            format!("{} {}", entries[0].task_id_str, entries[0].event)
        } else if events.len() == 1 {
            format!("{} tasks {}", tasks.len(), events.iter().next().unwrap())
        } else {
            format!("{} task events", entries.len())
        };
        format!("[{}] {}", body, self.suite)
    }

    fn footer(&self) -> Option<String> {
        self.footer_template.as_ref().map(|tpl| {
            tpl.replace("%{host}", &self.host)
                .replace("%{port}", &self.port)
                .replace("%{owner}", &self.owner)
                .replace("%{suite}", &self.suite)
        })
    }

    fn stdin(&self, entries: &[MailEntry]) -> String {
        let mut lines: Vec<String> = entries
            .iter()
            .map(|e| format!("{}: {}", e.event, e.task_id_str))
            .collect();
        lines.sort();

        let mut body = lines.join("\n");
        body.push_str("\n\n");
        body.push_str(&format!("suite: {}\n", self.suite));
        body.push_str(&format!("host: {}\n", self.host));
        body.push_str(&format!("port: {}\n", self.port));
        body.push_str(&format!("owner: {}\n", self.owner));
        if let Some(footer) = self.footer() {
            body.push('\n');
            body.push_str(&footer);
        }
        body
    }

    /// Build one `mail` sub-command covering every entry in the group.
    /// Entries must share `(event, subject)` grouping already — the
    /// registry groups before calling this.
    pub fn build_group_command(&self, entries: &[MailEntry]) -> Result<CommandContext, DriverError> {
        if entries.is_empty() {
            return Err(DriverError::CommandFailed("empty mail group".to_string()));
        }
        let subject = self.subject(entries);
        let argv = vec![
            "mail".to_string(),
            "-s".to_string(),
            subject,
            "-r".to_string(),
            self.mail_from.clone(),
            self.mail_to.clone(),
        ];
        let mut ctx = CommandContext::new("mail-batch", argv);
        ctx.stdin = Some(self.stdin(entries));
        if let Some(smtp) = &self.mail_smtp {
            ctx.env.insert("smtp".to_string(), smtp.clone());
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> MailDriver {
        MailDriver {
            suite: "my-suite".to_string(),
            mail_from: "cyclecore@localhost".to_string(),
            mail_to: "ops@example.com".to_string(),
            mail_smtp: Some("smtp.example.com".to_string()),
            host: "scheduler1".to_string(),
            port: "8080".to_string(),
            owner: "alice".to_string(),
            footer_template: None,
        }
    }

    #[test]
    fn single_task_single_event_subject() {
        let d = driver();
        let entries = vec![MailEntry {
            task_id_str: "20260101T00/foo/01".to_string(),
            event: "failed".to_string(),
        }];
        let cmd = d.build_group_command(&entries).unwrap();
        assert_eq!(cmd.argv[2], "[20260101T00/foo/01 failed] my-suite");
    }

    #[test]
    fn n_tasks_one_event_subject() {
        let d = driver();
        let entries = vec![
            MailEntry { task_id_str: "20260101T00/foo/01".to_string(), event: "failed".to_string() },
            MailEntry { task_id_str: "20260101T00/bar/01".to_string(), event: "failed".to_string() },
            MailEntry { task_id_str: "20260101T00/baz/01".to_string(), event: "failed".to_string() },
        ];
        let cmd = d.build_group_command(&entries).unwrap();
        assert_eq!(cmd.argv[2], "[3 tasks failed] my-suite");
    }

    #[test]
    fn n_tasks_m_events_subject() {
        let d = driver();
        let entries = vec![
            MailEntry { task_id_str: "20260101T00/foo/01".to_string(), event: "failed".to_string() },
            MailEntry { task_id_str: "20260101T00/bar/01".to_string(), event: "succeeded".to_string() },
        ];
        let cmd = d.build_group_command(&entries).unwrap();
        assert_eq!(cmd.argv[2], "[2 task events] my-suite");
    }

    #[test]
    fn stdin_lists_entries_sorted() {
        let d = driver();
        let entries = vec![
            MailEntry { task_id_str: "20260101T00/baz/01".to_string(), event: "failed".to_string() },
            MailEntry { task_id_str: "20260101T00/bar/01".to_string(), event: "failed".to_string() },
        ];
        let cmd = d.build_group_command(&entries).unwrap();
        let stdin = cmd.stdin.unwrap();
        let pos_bar = stdin.find("bar").unwrap();
        let pos_baz = stdin.find("baz").unwrap();
        assert!(pos_bar < pos_baz);
        assert!(stdin.contains("suite: my-suite"));
    }

    #[test]
    fn smtp_is_passed_via_environment() {
        let d = driver();
        let entries = vec![MailEntry { task_id_str: "x".to_string(), event: "failed".to_string() }];
        let cmd = d.build_group_command(&entries).unwrap();
        assert_eq!(cmd.env.get("smtp"), Some(&"smtp.example.com".to_string()));
    }
}
