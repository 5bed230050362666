// Secondary textual encodings of the container: a JSON codec and an
// XML encoder. The binary wire format (crate::wire) is the only
// bit-preserving channel; these exist for interop and inspection.
pub(crate) mod json;
pub(crate) mod xml;
