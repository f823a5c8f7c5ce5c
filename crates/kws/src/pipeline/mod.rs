pub mod ctm_parser;
pub mod hitlist;

pub use ctm_parser::{group_by_document, parse_ctm, parse_ctm_line, parse_ctm_str};
pub use hitlist::{
    HitList, HitRecord, Query, load_hit_list, load_queries, read_hit_list, to_hit_list,
    write_hit_list,
};
