use {
    crate::{
        EthRpc,
        types::{ChainBlock, ChainLog, ChainReceipt, block_from_rpc, log_from_rpc, receipt_from_rpc},
    },
    alloy::{
        eips::BlockNumberOrTag,
        primitives::{Address, B256},
        providers::{DynProvider, Provider, ProviderBuilder},
        rpc::types::Filter,
        sol,
        transports::{RpcError, TransportError, TransportErrorKind},
    },
    quarry_shared::primitives::lower_hex_address,
    thiserror::Error,
};

sol! {
    #[sol(rpc)]
    interface IErc20Metadata {
        function symbol() external view returns (string);
        function name() external view returns (string);
        function decimals() external view returns (uint8);
    }

    #[sol(rpc)]
    interface IDexPool {
        function token0() external view returns (address);
        function token1() external view returns (address);
        function factory() external view returns (address);
    }
}

#[derive(Debug, Error)]
pub enum RpcClientError {
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    #[error("invalid hash `{0}`")]
    InvalidHash(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Contract(#[from] alloy::contract::Error),
}

/// [`EthRpc`] over an alloy provider.
#[derive(Debug, Clone)]
pub struct AlloyRpc {
    provider: DynProvider,
}

impl AlloyRpc {
    /// Connects by URL scheme (`http(s)` or `ws(s)`).
    pub async fn connect(url: &str) -> Result<Self, RpcClientError> {
        let provider = ProviderBuilder::new().connect(url).await?;
        Ok(Self {
            provider: provider.erased(),
        })
    }

    pub fn from_provider(provider: DynProvider) -> Self {
        Self { provider }
    }

    fn parse_address(address: &str) -> Result<Address, RpcClientError> {
        address
            .parse()
            .map_err(|_| RpcClientError::InvalidAddress(address.to_owned()))
    }
}

fn transport_is_rate_limited(err: &TransportError) -> bool {
    match err {
        RpcError::Transport(TransportErrorKind::HttpError(http)) => http.status == 429,
        RpcError::ErrorResp(payload) => payload.code == -32005,
        _ => false,
    }
}

impl EthRpc for AlloyRpc {
    type Err = RpcClientError;

    async fn block_by_number(
        &self,
        number: u64,
        full: bool,
    ) -> Result<Option<ChainBlock>, Self::Err> {
        let request = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number));
        let block = if full {
            request.full().await?
        } else {
            request.await?
        };
        Ok(block.map(block_from_rpc))
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<ChainReceipt>, Self::Err> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|_| RpcClientError::InvalidHash(tx_hash.to_owned()))?;
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.as_ref().map(receipt_from_rpc))
    }

    async fn code_at(&self, address: &str) -> Result<Vec<u8>, Self::Err> {
        let address = Self::parse_address(address)?;
        let code = self.provider.get_code_at(address).await?;
        Ok(code.to_vec())
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<ChainLog>, Self::Err> {
        let filter = Filter::new().from_block(from_block).to_block(to_block);
        let logs = self.provider.get_logs(&filter).await?;
        Ok(logs.iter().map(log_from_rpc).collect())
    }

    async fn token_symbol(&self, address: &str) -> Result<String, Self::Err> {
        let contract = IErc20Metadata::new(Self::parse_address(address)?, &self.provider);
        Ok(contract.symbol().call().await?)
    }

    async fn token_name(&self, address: &str) -> Result<String, Self::Err> {
        let contract = IErc20Metadata::new(Self::parse_address(address)?, &self.provider);
        Ok(contract.name().call().await?)
    }

    async fn token_decimals(&self, address: &str) -> Result<u8, Self::Err> {
        let contract = IErc20Metadata::new(Self::parse_address(address)?, &self.provider);
        Ok(contract.decimals().call().await?)
    }

    async fn pool_token0(&self, address: &str) -> Result<String, Self::Err> {
        let contract = IDexPool::new(Self::parse_address(address)?, &self.provider);
        Ok(lower_hex_address(&contract.token0().call().await?))
    }

    async fn pool_token1(&self, address: &str) -> Result<String, Self::Err> {
        let contract = IDexPool::new(Self::parse_address(address)?, &self.provider);
        Ok(lower_hex_address(&contract.token1().call().await?))
    }

    async fn pool_factory(&self, address: &str) -> Result<String, Self::Err> {
        let contract = IDexPool::new(Self::parse_address(address)?, &self.provider);
        Ok(lower_hex_address(&contract.factory().call().await?))
    }

    fn is_rate_limited(err: &Self::Err) -> bool {
        match err {
            RpcClientError::Transport(e) => transport_is_rate_limited(e),
            RpcClientError::Contract(alloy::contract::Error::TransportError(e)) => {
                transport_is_rate_limited(e)
            }
            _ => false,
        }
    }

    fn is_result_set_too_large(err: &Self::Err) -> bool {
        match err {
            RpcClientError::Transport(RpcError::ErrorResp(payload)) => {
                payload.code == -32005 || payload.message.contains("more than 10000 results")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, alloy::rpc::json_rpc::ErrorPayload};

    fn error_resp(code: i64, message: &str) -> RpcClientError {
        RpcClientError::Transport(RpcError::ErrorResp(ErrorPayload {
            code,
            message: message.to_owned().into(),
            data: None,
        }))
    }

    #[test]
    fn test_limit_exceeded_code_shrinks_the_window() {
        let err = error_resp(-32005, "query returned more than 10000 results");
        assert!(AlloyRpc::is_result_set_too_large(&err));
        assert!(AlloyRpc::is_rate_limited(&err));
    }

    #[test]
    fn test_plain_execution_errors_are_not_retryable() {
        let err = error_resp(-32000, "header not found");
        assert!(!AlloyRpc::is_result_set_too_large(&err));
        assert!(!AlloyRpc::is_rate_limited(&err));
    }
}
