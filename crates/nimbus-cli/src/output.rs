//! Formatted output helpers for CLI commands.

/// Formats a replica count as `running/desired`.
#[must_use]
pub fn replicas_cell(replicas: u32, desired: u32) -> String {
    format!("{replicas}/{desired}")
}

/// Joins formatted port strings for one table cell.
#[must_use]
pub fn ports_cell(ports: &[String]) -> String {
    if ports.is_empty() {
        "-".to_owned()
    } else {
        ports.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replicas_cell_shows_running_over_desired() {
        assert_eq!(replicas_cell(1, 1), "1/1");
        assert_eq!(replicas_cell(0, 1), "0/1");
    }

    #[test]
    fn ports_cell_joins_or_dashes() {
        assert_eq!(ports_cell(&[]), "-");
        assert_eq!(
            ports_cell(&["1.2.3.4:80->80/tcp".to_owned(), "1.2.3.4:443->443/tcp".to_owned()]),
            "1.2.3.4:80->80/tcp, 1.2.3.4:443->443/tcp"
        );
    }
}
