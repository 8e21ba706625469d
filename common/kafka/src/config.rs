use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "false")]
    pub kafka_verify_ssl_certificate: bool,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    #[envconfig(default = "catalog-sync")]
    pub kafka_consumer_group: String,

    // CDC topics start with a snapshot, so a fresh group should read from the beginning
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    #[envconfig(default = "6000")]
    pub kafka_session_timeout_ms: u32,

    // How long startup waits for topic metadata before declaring the broker unreachable
    #[envconfig(default = "10000")]
    pub kafka_metadata_timeout_ms: u64,
}
