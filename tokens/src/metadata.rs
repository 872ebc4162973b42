use {
    quarry_chain::EthRpc,
    quarry_store::{Store, TokenRecord, TokenType},
};

/// What a transfer handler needs to know about a token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedToken {
    pub symbol: Option<String>,
    pub decimals: Option<i16>,
}

/// Two-tier token metadata lookup: the token table first, the token
/// contract's view methods second. Whatever the chain answered is cached,
/// including a total failure, so dead tokens are not refetched on every
/// transfer they appear in.
#[derive(Debug, Clone)]
pub struct TokenDirectory<S, R> {
    store: S,
    rpc: R,
}

impl<S: Store, R: EthRpc> TokenDirectory<S, R> {
    pub fn new(store: S, rpc: R) -> Self {
        Self { store, rpc }
    }

    pub async fn metadata(
        &self,
        token_address: &str,
        token_type: TokenType,
    ) -> Result<ResolvedToken, S::Err> {
        let address = token_address.to_ascii_lowercase();
        if let Some(token) = self.store.token(&address).await? {
            return Ok(ResolvedToken {
                symbol: token.symbol,
                decimals: token.decimals,
            });
        }
        Ok(self.fetch_from_chain(&address, token_type).await)
    }

    /// ERC-20 exposes `symbol`/`name`/`decimals`, ERC-721 has no
    /// `decimals`, ERC-1155 only reliably exposes `name`. A view method a
    /// token does not implement simply resolves to `None`.
    async fn fetch_from_chain(&self, address: &str, token_type: TokenType) -> ResolvedToken {
        let symbol = match token_type {
            TokenType::Erc1155 => None,
            _ => self.rpc.token_symbol(address).await.ok(),
        };
        let name = self.rpc.token_name(address).await.ok();
        let decimals = match token_type {
            TokenType::Erc20 => self.rpc.token_decimals(address).await.ok().map(i16::from),
            _ => None,
        };

        let failed = symbol.is_none() && name.is_none() && decimals.is_none();
        if failed {
            tracing::warn!("Could not fetch metadata for token {address}");
        }
        let record = TokenRecord {
            token_address: address.to_owned(),
            token_type: Some(token_type),
            symbol: symbol.clone(),
            name,
            decimals,
            failed,
            extra: None,
        };
        if let Err(e) = self.store.upsert_token(&record).await {
            tracing::warn!("Could not cache metadata for token {address}: {e}");
        }

        ResolvedToken { symbol, decimals }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        quarry_chain::test_doubles::StubRpc,
        quarry_store::InMemoryStore,
    };

    const TOKEN: &str = "0x00000000000000000000000000000000000000aa";

    #[tokio::test]
    async fn test_database_hit_skips_the_chain() {
        let store = InMemoryStore::new();
        store
            .upsert_token(&TokenRecord {
                token_address: TOKEN.to_owned(),
                token_type: Some(TokenType::Erc20),
                symbol: Some("USDC".to_owned()),
                name: Some("USD Coin".to_owned()),
                decimals: Some(6),
                failed: false,
                extra: None,
            })
            .await
            .unwrap();
        let rpc = StubRpc::new();
        let directory = TokenDirectory::new(store, rpc.clone());

        let resolved = directory.metadata(TOKEN, TokenType::Erc20).await.unwrap();
        assert_eq!(resolved.symbol.as_deref(), Some("USDC"));
        assert_eq!(resolved.decimals, Some(6));
        assert_eq!(rpc.call_count("token_symbol"), 0);
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches() {
        let store = InMemoryStore::new();
        let rpc = StubRpc::new()
            .with_symbol(TOKEN, "WETH")
            .with_name(TOKEN, "Wrapped Ether")
            .with_decimals(TOKEN, 18);
        let directory = TokenDirectory::new(store.clone(), rpc.clone());

        let resolved = directory.metadata(TOKEN, TokenType::Erc20).await.unwrap();
        assert_eq!(resolved.symbol.as_deref(), Some("WETH"));
        assert_eq!(resolved.decimals, Some(18));

        // Second lookup is served by the table.
        directory.metadata(TOKEN, TokenType::Erc20).await.unwrap();
        assert_eq!(rpc.call_count("token_symbol"), 1);

        let cached = store.token(TOKEN).await.unwrap().unwrap();
        assert!(!cached.failed);
        assert_eq!(cached.name.as_deref(), Some("Wrapped Ether"));
    }

    #[tokio::test]
    async fn test_all_views_throwing_records_a_failed_token() {
        let store = InMemoryStore::new();
        let directory = TokenDirectory::new(store.clone(), StubRpc::new());

        let resolved = directory.metadata(TOKEN, TokenType::Erc20).await.unwrap();
        assert_eq!(resolved, ResolvedToken::default());
        assert!(store.token(TOKEN).await.unwrap().unwrap().failed);
    }

    #[tokio::test]
    async fn test_erc1155_only_asks_for_the_name() {
        let store = InMemoryStore::new();
        let rpc = StubRpc::new().with_name(TOKEN, "Editions");
        let directory = TokenDirectory::new(store, rpc.clone());

        let resolved = directory.metadata(TOKEN, TokenType::Erc1155).await.unwrap();
        assert_eq!(resolved.symbol, None);
        assert_eq!(rpc.call_count("token_symbol"), 0);
        assert_eq!(rpc.call_count("token_decimals"), 0);
        assert_eq!(rpc.call_count("token_name"), 1);
    }

    #[tokio::test]
    async fn test_addresses_are_normalized_before_lookup() {
        let store = InMemoryStore::new();
        let rpc = StubRpc::new().with_symbol(TOKEN, "AAA").with_name(TOKEN, "A");
        let directory = TokenDirectory::new(store.clone(), rpc);

        directory
            .metadata(&TOKEN.to_ascii_uppercase().replace("0X", "0x"), TokenType::Erc721)
            .await
            .unwrap();
        assert!(store.token(TOKEN).await.unwrap().is_some());
    }
}
