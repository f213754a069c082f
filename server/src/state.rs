use std::sync::Arc;

use pipeline::accounts::AccountStore;
use pipeline::broker::redis::RedisBroker;
use pipeline::broker::Broker;
use pipeline::executor::{DeploymentExecutor, Executor, NoopProvisioner};
use pipeline::producer::Producer;
use pipeline::topics;

use super::{
    config::Config,
    database::{init_redis, RedisAccounts},
};

pub struct State {
    pub config: Config,
    pub producer: Producer,
    pub broker: Arc<dyn Broker>,
    pub accounts: Arc<dyn AccountStore>,
    pub executor: Arc<dyn Executor>,
}

impl State {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let connection = init_redis(&config.broker_url()).await;
        let broker: Arc<dyn Broker> = Arc::new(RedisBroker::new(connection.clone()));
        topics::ensure_all(broker.as_ref())
            .await
            .expect("Stream topology misconfigured!");

        let accounts: Arc<dyn AccountStore> = Arc::new(RedisAccounts::new(connection));
        let producer = Producer::new(broker.clone());
        let executor: Arc<dyn Executor> = Arc::new(DeploymentExecutor::new(
            producer.clone(),
            accounts.clone(),
            Arc::new(NoopProvisioner),
        ));

        Arc::new(Self {
            config,
            producer,
            broker,
            accounts,
            executor,
        })
    }
}
