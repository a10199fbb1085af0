pub(crate) mod support;

mod feed_intents_test;
mod storage_recovery_test;
