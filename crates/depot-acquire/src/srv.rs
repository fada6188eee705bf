/// One DNS SRV answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// Source of SRV answers for `_service._tcp.host` names. The stub
/// resolver in libc offers no SRV interface, so lookups are pluggable;
/// the default resolver answers nothing, which degrades to plain DNS.
pub trait SrvResolver {
    fn query(&self, name: &str) -> Vec<SrvRecord>;
}

/// No SRV support: every query misses.
#[derive(Debug, Default)]
pub struct NoSrv;

impl SrvResolver for NoSrv {
    fn query(&self, _name: &str) -> Vec<SrvRecord> {
        Vec::new()
    }
}

/// Parse `priority weight port target` answer lines, the format
/// produced by the common lookup utilities.
pub fn parse_srv_answers(text: &str) -> Vec<SrvRecord> {
    let mut records = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            continue;
        }
        let (Ok(priority), Ok(weight), Ok(port)) = (
            fields[0].parse(),
            fields[1].parse(),
            fields[2].parse(),
        ) else {
            continue;
        };
        records.push(SrvRecord {
            priority,
            weight,
            port,
            target: fields[3].trim_end_matches('.').to_string(),
        });
    }
    records
}

/// Order records the way targets should be tried: by ascending
/// priority, heavier weights first within a priority band.
pub fn order_srv_records(mut records: Vec<SrvRecord>) -> Vec<SrvRecord> {
    records.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(b.weight.cmp(&a.weight))
    });
    records
}

/// A single answer whose target is `.` means the service is explicitly
/// not provided at this domain (RFC 2782).
pub fn service_refused(records: &[SrvRecord]) -> bool {
    records.len() == 1 && records[0].target.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_orders() {
        let records = parse_srv_answers(
            "20 10 443 backup.example.org.\n\
             10 60 443 main.example.org.\n\
             10 40 443 alt.example.org.\n\
             garbage line\n",
        );
        let ordered = order_srv_records(records);
        let targets: Vec<&str> = ordered.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(
            targets,
            vec!["main.example.org", "alt.example.org", "backup.example.org"]
        );
    }

    #[test]
    fn detects_refusal() {
        let records = parse_srv_answers("0 0 0 .\n");
        assert!(service_refused(&records));
        assert!(!service_refused(&[]));
    }
}
