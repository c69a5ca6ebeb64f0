use std::fmt::Write as _;
use std::io::Write;
use std::net::IpAddr;

use anyhow::Result;

use crate::state::{ProbeOutcome, ProbeTable};

/// Classic traceroute line for one hop.
///
/// Consecutive replies from the same address share one address column; a
/// timeout breaks the run. Annotations such as `!H` follow the RTT.
pub fn render_hop(ttl: u8, probes: &[ProbeOutcome]) -> String {
    let mut line = format!("{:2}  ", ttl);
    let mut last_addr: Option<IpAddr> = None;

    for (i, probe) in probes.iter().enumerate() {
        let Some(addr) = probe.addr else {
            if i > 0 {
                line.push_str("  ");
            }
            line.push('*');
            last_addr = None;
            continue;
        };

        if last_addr != Some(addr) {
            if i > 0 {
                line.push_str("  ");
            }
            let _ = write!(line, "{}", addr);
            last_addr = Some(addr);
        }

        if let Some(rtt) = probe.rtt_ms {
            let _ = write!(line, "  {:.3} ms", rtt);
        }
        if let Some(err) = probe.err.as_deref().filter(|e| !e.is_empty()) {
            let _ = write!(line, " {}", err);
        }
    }

    line
}

/// Render every hop up to the final one, then the MPLS/extension lines
pub fn export_text<W: Write>(table: &ProbeTable, mut writer: W) -> Result<()> {
    let first = table.first_hop();
    let last = table
        .final_ttl()
        .or_else(|| table.iter().last().map(|p| p.ttl))
        .unwrap_or(first);

    for ttl in first..=last {
        let outcomes: Vec<ProbeOutcome> = table.hop(ttl).iter().map(|p| p.outcome()).collect();
        writeln!(writer, "{}", render_hop(ttl, &outcomes))?;
        for ext in outcomes.iter().filter_map(|o| o.extensions.as_deref()) {
            writeln!(writer, "     <{}>", ext)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn reply(addr: [u8; 4], rtt: f64) -> ProbeOutcome {
        ProbeOutcome {
            ttl: 1,
            probe_idx: 0,
            addr: Some(IpAddr::V4(Ipv4Addr::from(addr))),
            rtt_ms: Some(rtt),
            err: None,
            extensions: None,
        }
    }

    fn timeout() -> ProbeOutcome {
        ProbeOutcome {
            ttl: 1,
            probe_idx: 0,
            addr: None,
            rtt_ms: None,
            err: None,
            extensions: None,
        }
    }

    #[test]
    fn test_groups_same_address() {
        let probes = [reply([10, 0, 0, 1], 1.234), reply([10, 0, 0, 1], 2.345)];
        assert_eq!(render_hop(1, &probes), " 1  10.0.0.1  1.234 ms  2.345 ms");
    }

    #[test]
    fn test_address_change_and_timeouts() {
        let probes = [
            reply([10, 0, 0, 1], 1.0),
            timeout(),
            reply([10, 0, 0, 1], 3.5),
            reply([10, 0, 0, 2], 4.0),
        ];
        assert_eq!(
            render_hop(12, &probes),
            "12  10.0.0.1  1.000 ms  *  10.0.0.1  3.500 ms  10.0.0.2  4.000 ms"
        );
    }

    #[test]
    fn test_all_timeouts() {
        assert_eq!(render_hop(3, &[timeout(), timeout(), timeout()]), " 3  *  *  *");
    }

    #[test]
    fn test_annotation_follows_rtt() {
        let mut probe = reply([192, 0, 2, 1], 9.0);
        probe.err = Some("!H".into());
        assert_eq!(render_hop(7, &[probe]), " 7  192.0.2.1  9.000 ms !H");
    }

    #[test]
    fn test_export_text_until_final_hop() {
        use crate::state::ProbeRegistry;

        let mut table = ProbeTable::new(1, 4, 1);
        for ttl in 1..=4u8 {
            table.register(ttl, 0, ttl as u32, 1.0);
        }
        let probe = table.lookup(2).unwrap();
        probe.reply_addr = Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9)));
        probe.recv_time = 1.002;
        probe.final_hop = true;
        probe.extensions = Some("MPLS:L=100,E=0,S=1,T=1".into());

        let mut buf = Vec::new();
        export_text(&table, &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            " 1  *\n 2  192.0.2.9  2.000 ms\n     <MPLS:L=100,E=0,S=1,T=1>\n"
        );
    }
}
