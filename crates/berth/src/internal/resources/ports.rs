use crate::internal::common::Map;
use crate::internal::range::{self, ValueRange};
use crate::internal::resources::descriptor::PortDefinition;

/// Encodes a resolved port assignment as
/// `label1:port,port,...;label2:port,...;` (every group terminated by a
/// semicolon). Static definitions emit their fixed ports; dynamic
/// definitions consume ports in order from `ranges` after the static
/// ones are set aside. Labels are emitted in sorted order so the output
/// is deterministic.
///
/// The string is handed to launched task processes through their
/// environment; [`decode_port_string`] turns it back into a coalesced
/// range list.
pub fn encode_port_assignment(
    definitions: &Map<String, PortDefinition>,
    ranges: &[ValueRange],
) -> String {
    let static_ranges: Vec<ValueRange> = definitions
        .values()
        .filter_map(|def| def.static_range())
        .collect();
    let dynamic_pool = range::subtract(ranges, &static_ranges);

    let mut labels: Vec<&String> = definitions.keys().collect();
    labels.sort();

    let mut out = String::new();
    let mut next_dynamic: i64 = 0;
    for label in labels {
        let def = &definitions[label];
        if def.count <= 0 {
            continue;
        }
        out.push_str(label);
        out.push(':');
        for i in 0..def.count {
            let port = if def.is_dynamic() {
                let port = range::value_at(&dynamic_pool, next_dynamic);
                next_dynamic += 1;
                port
            } else {
                def.start + i
            };
            if i > 0 {
                out.push(',');
            }
            out.push_str(&port.to_string());
        }
        out.push(';');
    }
    out
}

/// Scans every integer substring of `encoded` and returns the coalesced
/// set of ports it mentions. Tolerant of any separator layout, so it
/// round-trips anything [`encode_port_assignment`] produces.
pub fn decode_port_string(encoded: &str) -> Vec<ValueRange> {
    let singles: Vec<ValueRange> = encoded
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse::<i32>().ok())
        .map(|port| ValueRange::new(port, port))
        .collect();
    range::coalesce(&singles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(entries: &[(&str, i32, i32)]) -> Map<String, PortDefinition> {
        entries
            .iter()
            .map(|&(label, start, count)| (label.to_string(), PortDefinition { start, count }))
            .collect()
    }

    #[test]
    fn test_encode_static_and_dynamic() {
        let definitions = defs(&[("http", 8080, 2), ("rpc", 0, 3)]);
        // Resolved resource: static 8080-8081 plus dynamic picks 9000-9002
        let ranges = vec![ValueRange::new(8080, 8081), ValueRange::new(9000, 9002)];
        let encoded = encode_port_assignment(&definitions, &ranges);
        assert_eq!(encoded, "http:8080,8081;rpc:9000,9001,9002;");
    }

    #[test]
    fn test_decode() {
        let decoded = decode_port_string("http:8080,8081;rpc:9000,9001,9002;");
        assert_eq!(
            decoded,
            vec![ValueRange::new(8080, 8081), ValueRange::new(9000, 9002)]
        );
        assert_eq!(decode_port_string(""), vec![]);
        assert_eq!(decode_port_string("a:;b:;"), vec![]);
    }

    #[test]
    fn test_round_trip() {
        let definitions = defs(&[("a", 5000, 2), ("b", 0, 2), ("c", 7000, 1)]);
        let ranges = vec![
            ValueRange::new(5000, 5001),
            ValueRange::new(7000, 7000),
            ValueRange::new(6100, 6101),
        ];
        let encoded = encode_port_assignment(&definitions, &ranges);
        assert_eq!(decode_port_string(&encoded), range::coalesce(&ranges));
    }
}
