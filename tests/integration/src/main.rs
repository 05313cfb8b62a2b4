mod helpers;

mod freshness;
