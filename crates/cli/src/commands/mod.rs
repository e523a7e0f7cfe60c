pub(crate) mod rounds;
pub(crate) mod simulate;
