//! Decoder for `/proc/net/nf_conntrack` dumps.
//!
//! A tracked TCP flow looks like:
//!
//! ```text
//! ipv4 2 tcp 6 431999 ESTABLISHED src=A dst=B sport=1 dport=2 packets=10 bytes=100 \
//!     src=B dst=A sport=2 dport=1 packets=20 bytes=200 [ASSURED] mark=0 use=2
//! ```
//!
//! The first `src=` starts the original tuple, the second the reply tuple.
//! Whether a tuple is transmit or receive depends on which side is local.

use crate::emit::{Emission, Labels};
use crate::error::ConntrackError;
use crate::stations::StationTable;
use std::collections::{HashMap, HashSet};
use tracing::warn;

pub const JOB: &str = "conntrack";

/// Local address assumed when none is configured.
pub const DEFAULT_LOCAL_ADDRESS: &str = "135.23.201.114";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Tx,
    Rx,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Tx => "tx",
            Direction::Rx => "rx",
        }
    }
}

pub struct ConntrackDecoder {
    local: HashSet<String>,
}

impl ConntrackDecoder {
    pub fn new<I, S>(local_addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            local: local_addresses.into_iter().map(Into::into).collect(),
        }
    }

    fn is_local(&self, addr: Option<&&str>) -> bool {
        addr.is_some_and(|a| self.local.contains(*a))
    }

    /// Decodes a dump into `<tx|rx>_<packets|bytes>` emissions.
    ///
    /// Lines whose direction cannot be told are logged and skipped.
    pub fn decode(
        &self,
        text: &str,
        stations: &StationTable,
    ) -> Result<Vec<Emission>, ConntrackError> {
        let mut out = Vec::new();
        for line in text.split('\n') {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 || fields[0] != "ipv4" || fields[2] != "tcp" {
                continue;
            }
            self.decode_flow(line, &fields, stations, &mut out)?;
        }
        Ok(out)
    }

    fn decode_flow(
        &self,
        line: &str,
        fields: &[&str],
        stations: &StationTable,
        out: &mut Vec<Emission>,
    ) -> Result<(), ConntrackError> {
        // (tuple index, key, value) for every key=value field inside a tuple.
        let mut pairs = Vec::new();
        let mut tuples: [HashMap<&str, &str>; 2] = [HashMap::new(), HashMap::new()];
        let mut srcs = 0;
        for field in fields {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            if key == "src" {
                srcs += 1;
            }
            if srcs == 0 || srcs > 2 {
                continue;
            }
            tuples[srcs - 1].insert(key, value);
            pairs.push((srcs - 1, key, value));
        }

        let [orig, reply] = &tuples;
        let dirs = if self.is_local(orig.get("src")) || self.is_local(reply.get("dst")) {
            [Direction::Tx, Direction::Rx]
        } else if self.is_local(orig.get("dst")) || self.is_local(reply.get("src")) {
            [Direction::Rx, Direction::Tx]
        } else {
            warn!(line = %line, "conntrack: unknown direction, skipping");
            return Ok(());
        };

        let osrc = orig.get("src").copied().unwrap_or("");
        let odst = orig.get("dst").copied().unwrap_or("");
        let osport = orig.get("sport").copied().unwrap_or("");
        let odport = orig.get("dport").copied().unwrap_or("");

        let mut tuple_labels = [Labels::new(), Labels::new()];
        for (labels, (src, sport, dst, dport)) in tuple_labels
            .iter_mut()
            .zip([(osrc, osport, odst, odport), (odst, odport, osrc, osport)])
        {
            labels.insert("src".to_string(), stations.resolve(src).to_string());
            labels.insert("sport".to_string(), sport.to_string());
            labels.insert("dst".to_string(), stations.resolve(dst).to_string());
            labels.insert("dport".to_string(), dport.to_string());
        }

        for (tuple, key, value) in pairs {
            if key != "packets" && key != "bytes" {
                continue;
            }
            let count: u64 = value.parse().map_err(|_| ConntrackError::InvalidCounter {
                key: key.to_string(),
                value: value.to_string(),
                line: line.to_string(),
            })?;
            out.push(Emission::new(
                format!("{}_{}", dirs[tuple].as_str(), key),
                tuple_labels[tuple].clone(),
                count as f64,
            ));
        }
        Ok(())
    }
}

impl Default for ConntrackDecoder {
    fn default() -> Self {
        Self::new([DEFAULT_LOCAL_ADDRESS])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{SeriesContext, build_point};

    const A: &str = "10.0.0.1";
    const B: &str = "93.184.216.34";

    fn flow(orig_src: &str, orig_dst: &str) -> String {
        format!(
            "ipv4     2 tcp      6 431999 ESTABLISHED src={a} dst={b} sport=51000 dport=443 \
             packets=10 bytes=100 src={b} dst={a} sport=443 dport=51000 packets=20 bytes=200 \
             [ASSURED] mark=0 zone=0 use=2",
            a = orig_src,
            b = orig_dst
        )
    }

    fn value(out: &[Emission], key: &str) -> f64 {
        out.iter().find(|e| e.key == key).unwrap().value
    }

    #[test]
    fn test_outbound_flow() {
        let dec = ConntrackDecoder::new([A]);
        let out = dec.decode(&flow(A, B), &StationTable::default()).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(value(&out, "tx_packets"), 10.0);
        assert_eq!(value(&out, "tx_bytes"), 100.0);
        assert_eq!(value(&out, "rx_packets"), 20.0);
        assert_eq!(value(&out, "rx_bytes"), 200.0);

        let ctx = SeriesContext::new(JOB, "conntrack");
        let names: Vec<_> = out
            .iter()
            .map(|e| build_point(&ctx, e, 0).labels["__name__"].clone())
            .collect();
        assert_eq!(
            names,
            vec![
                "conntrack_tx_packets",
                "conntrack_tx_bytes",
                "conntrack_rx_packets",
                "conntrack_rx_bytes"
            ]
        );
    }

    #[test]
    fn test_inbound_flow_swaps_directions() {
        let dec = ConntrackDecoder::new([A]);
        let out = dec.decode(&flow(B, A), &StationTable::default()).unwrap();
        assert_eq!(value(&out, "rx_packets"), 10.0);
        assert_eq!(value(&out, "tx_packets"), 20.0);
    }

    #[test]
    fn test_labels_resolve_and_mirror() {
        let dec = ConntrackDecoder::new([A]);
        let stations = StationTable::from_pairs([(A, "router")]);
        let out = dec.decode(&flow(A, B), &stations).unwrap();

        let tx = out.iter().find(|e| e.key == "tx_bytes").unwrap();
        assert_eq!(tx.labels["src"], "router");
        assert_eq!(tx.labels["sport"], "51000");
        assert_eq!(tx.labels["dst"], B);
        assert_eq!(tx.labels["dport"], "443");

        let rx = out.iter().find(|e| e.key == "rx_bytes").unwrap();
        assert_eq!(rx.labels["src"], B);
        assert_eq!(rx.labels["sport"], "443");
        assert_eq!(rx.labels["dst"], "router");
        assert_eq!(rx.labels["dport"], "51000");
    }

    #[test]
    fn test_unknown_direction_is_skipped() {
        let dec = ConntrackDecoder::new(["192.0.2.1"]);
        let out = dec.decode(&flow(A, B), &StationTable::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_filters_family_and_protocol() {
        let dec = ConntrackDecoder::new([A]);
        let text = format!(
            "{}\n{}\nipv4 2 tcp\n\n",
            flow(A, B).replace("ipv4", "ipv6"),
            flow(A, B).replace(" tcp ", " udp ")
        );
        assert!(dec.decode(&text, &StationTable::default()).unwrap().is_empty());
    }

    #[test]
    fn test_multiple_local_addresses() {
        let dec = ConntrackDecoder::new(["192.0.2.1", A]);
        let text = format!("{}\n{}\n", flow(A, B), flow(B, "192.0.2.1"));
        let out = dec.decode(&text, &StationTable::default()).unwrap();
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_bad_counter_is_error() {
        let dec = ConntrackDecoder::new([A]);
        let text = flow(A, B).replace("bytes=100", "bytes=lots");
        let err = dec.decode(&text, &StationTable::default()).unwrap_err();
        assert!(matches!(err, ConntrackError::InvalidCounter { ref value, .. } if value == "lots"));
    }

    #[test]
    fn test_default_local_address() {
        let dec = ConntrackDecoder::default();
        let out = dec
            .decode(&flow(DEFAULT_LOCAL_ADDRESS, B), &StationTable::default())
            .unwrap();
        assert_eq!(value(&out, "tx_packets"), 10.0);
    }
}
