//! Zinc grid codec.
//!
//! Requests to the server are Zinc grids: a `ver:"3.0"` meta line, a header
//! line of comma-separated column names, and one line per row. This module
//! builds those grids from any [`CommitRecord`] or [`HisWriteRecord`] and
//! decodes the JSON grids the server sends back. It depends on nothing above
//! it; record types opt in by implementing those traits.
//!
//! Header columns are always sorted lexicographically so the same records
//! produce byte-identical grids across runs; existing consumers depend on
//! that ordering. Every free-text cell, including filter expressions, goes
//! through [`escape`], which is the boundary that keeps caller-controlled
//! text from adding rows or columns.

mod decode;
mod grid;
mod value;

pub use self::{
    decode::{
        Dict,
        decode_datetime,
        decode_dict,
        decode_rows,
        decode_value,
        dict_to_json,
        response_error,
        value_to_json,
    },
    grid::{
        CommitOp,
        CommitRecord,
        Grid,
        HIS_WRITE_TS_FORMAT,
        HisWriteRecord,
        ZINC_VERSION,
        encode_commit_add,
        encode_commit_remove,
        encode_commit_update,
        encode_his_write_rpc,
        encode_read_by_filter,
        his_write_expr,
        is_tag_name,
    },
    value::{MARKER_SENTINEL, REF_SIGIL, Ref, Value, ZonedDateTime, escape, format_number, quote},
};

#[cfg(test)]
mod tests;
