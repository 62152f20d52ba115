pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;

/// Split an Annex B byte stream into NAL units, each keeping its start code.
pub fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = vec![];
    let mut i = 0;

    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            starts.push(start);
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(data.len());
            &data[start..end]
        })
        .collect()
}

/// H.264 `nal_unit_type` of a NAL unit that still carries its start code.
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    let header = nal.iter().position(|&b| b == 1)? + 1;
    nal.get(header).map(|b| b & 0x1f)
}

/// Separate SPS/PPS parameter sets from the rest of an access unit.
pub fn split_parameter_sets(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut config = vec![];
    let mut rest = vec![];

    for nal in split_nal_units(data) {
        match nal_type(nal) {
            Some(NAL_TYPE_SPS) | Some(NAL_TYPE_PPS) => config.extend_from_slice(nal),
            _ => rest.extend_from_slice(nal),
        }
    }

    (config, rest)
}
