mod adapter;
mod subprocess;
