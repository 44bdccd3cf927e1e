mod graph;
mod ledger;
mod network;
mod types;
