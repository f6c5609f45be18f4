//! Custom handler driver (C7): template-or-classic dual interface.

use crate::domain::error::DriverError;
use crate::services::process_pool::CommandContext;
use crate::services::shell_quote::quote_value;

use super::{is_template, substitute_template, HandlerData, HandlerDriver};

/// One custom handler, bound to the event it fired for and the data
/// dictionary available at dispatch time.
pub struct CustomHandlerDriver {
    /// Index suffix for multiple handlers on the same event
    /// (`event-handler-00`, `event-handler-01`, ...).
    pub label: String,
    pub handler_string: String,
    pub data: HandlerData,
}

impl HandlerDriver for CustomHandlerDriver {
    fn build_command(&self) -> Result<CommandContext, DriverError> {
        let map = self.data.as_map();
        let substituted = substitute_template(&self.handler_string, &map, &self.label)?;

        let argv = if is_template(&self.handler_string, &substituted) {
            vec![substituted]
        } else {
            let positional = [
                self.data.event.as_str(),
                self.data.suite.as_str(),
                self.data.id.as_str(),
            ];
            let mut parts = vec![self.handler_string.clone()];
            parts.extend(positional.iter().map(|v| quote_value(Some(v))));
            parts.push(quote_value(self.data.message.as_deref()));
            vec![parts.join(" ")]
        };

        let mut ctx = CommandContext::new(format!("{}/{}", self.data.id, self.label), argv);
        ctx.shell = true;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> HandlerData {
        HandlerData {
            event: "failed".to_string(),
            suite: "my-suite".to_string(),
            point: "20260101T00".to_string(),
            name: "foo".to_string(),
            submit_num: 1,
            id: "foo.20260101T00".to_string(),
            message: Some("oom killed".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn template_handler_is_substituted_in_place() {
        let driver = CustomHandlerDriver {
            label: "event-handler-00".to_string(),
            handler_string: "notify-cmd ${event} ${id}".to_string(),
            data: data(),
        };
        let cmd = driver.build_command().unwrap();
        assert_eq!(cmd.argv, vec!["notify-cmd failed foo.20260101T00"]);
    }

    #[test]
    fn classic_handler_gets_four_positional_args() {
        let driver = CustomHandlerDriver {
            label: "event-handler-00".to_string(),
            handler_string: "/usr/bin/my-handler".to_string(),
            data: data(),
        };
        let cmd = driver.build_command().unwrap();
        assert_eq!(
            cmd.argv,
            vec!["/usr/bin/my-handler failed my-suite foo.20260101T00 'oom killed'"]
        );
    }

    #[test]
    fn classic_handler_quotes_missing_message_as_none() {
        let mut d = data();
        d.message = None;
        let driver = CustomHandlerDriver {
            label: "event-handler-00".to_string(),
            handler_string: "/usr/bin/my-handler".to_string(),
            data: d,
        };
        let cmd = driver.build_command().unwrap();
        assert!(cmd.argv[0].ends_with("None"));
    }

    #[test]
    fn template_substitution_is_idempotent() {
        let driver = CustomHandlerDriver {
            label: "event-handler-00".to_string(),
            handler_string: "notify-cmd ${event}".to_string(),
            data: data(),
        };
        let first = driver.build_command().unwrap();
        let second = driver.build_command().unwrap();
        assert_eq!(first.argv, second.argv);
    }
}
