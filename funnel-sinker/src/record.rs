use serde::{Deserialize, Serialize};

/// One row of the exported table.
///
/// The field names follow the exported batch table: `code` is the primary key and
/// strictly increasing across generated data, which is what the output
/// checker uses to verify order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub code: u32,

    #[serde(rename = "ref")]
    pub ref_id: String,

    #[serde(rename = "type")]
    pub kind: u32,

    pub nature: Option<u32>,

    #[serde(rename = "etat")]
    pub state: u32,

    pub ref2: Option<String>,
}

/// Generate `count` deterministic records with ascending `code`, standing in
/// for a database table.
pub fn gen_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| Record {
            code: 10000 + i as u32,
            ref_id: format!("REF{:08}", i),
            kind: (i % 5) as u32,
            nature: if i % 3 == 0 { None } else { Some((i % 7) as u32) },
            state: (i % 2) as u32,
            ref2: if i % 4 == 0 {
                Some(format!("ALT{:08}", i))
            } else {
                None
            },
        })
        .collect()
}
