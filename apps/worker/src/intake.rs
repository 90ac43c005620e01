//! Command intake: one JSON `OrchestrationCommand` per line on stdin.

use std::sync::Arc;

use marketsync_etl::{EtlOrchestrator, OrchestrationCommand, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Parses a non-blank line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Option<Result<OrchestrationCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(OrchestrationCommand::from_json(line))
}

/// Reads commands until the input closes. Malformed lines are logged and skipped.
pub async fn consume<R>(orchestrator: Arc<EtlOrchestrator>, input: R) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut accepted = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Command intake stopped: {}", e);
                break;
            }
        };
        let command = match parse_line(&line) {
            None => continue,
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                warn!("Dropping malformed command: {}", e);
                continue;
            }
        };
        match orchestrator.submit(command).await {
            Ok(request_id) => {
                accepted += 1;
                info!("Accepted command as {}", request_id);
            }
            Err(e) => warn!("Command rejected: {}", e),
        }
    }
    accepted
}

pub fn start_stdin_intake(orchestrator: Arc<EtlOrchestrator>) {
    tokio::spawn(async move {
        let accepted = consume(orchestrator, BufReader::new(tokio::io::stdin())).await;
        info!("Command intake closed after {} commands", accepted);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_etl::MarketplaceEvent;

    #[test]
    fn parses_command_lines() {
        let command = parse_line(
            r#"{"accountId": 5, "event": "SALES_FACT", "dateFrom": "2024-03-01", "dateTo": "2024-03-02"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(command.account_id, 5);
        assert_eq!(command.event, MarketplaceEvent::SalesFact);
        assert!(command.request_id.is_none());
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert!(parse_line("   ").is_none());
        assert!(parse_line("# replay of march").is_none());
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert!(parse_line("{not json").unwrap().is_err());
        assert!(parse_line(r#"{"accountId": 5, "event": "NOPE", "dateFrom": "2024-03-01", "dateTo": "2024-03-02"}"#)
            .unwrap()
            .is_err());
    }
}
