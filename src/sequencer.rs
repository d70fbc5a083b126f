use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use alloy_primitives::U256;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    client::{
        ChainClient, ContractBinding, WalletProvider,
        loader::DescriptorLoader,
        subscription::{DiagnosticChannel, SubscriptionHandle},
    },
    config::SequencerConfig,
    constants::{
        BALANCE_OF_METHOD, CONFIGURATION_MESSAGE, PROVIDER_UNAVAILABLE_MESSAGE, TRANSFER_EVENT,
        TRANSFER_METHOD,
    },
    error::{SequenceError, root_message},
    helpers::address::readable_address,
    output::{OutputLog, OutputSink},
    types::{
        Account, EventFilter, SendOptions, Token, descriptor::ContractDescriptor,
        event::Diagnostic,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RequireConfiguration,
    RequireProvider,
    Connect,
    LoadDescriptor,
    BindContract,
    ReadNativeBalance,
    ReadTokenBalance,
    Subscribe,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceState {
    #[default]
    Idle,
    Configuring,
    Connecting,
    DescriptorLoading,
    Bound,
    ReadingNativeBalance,
    ReadingTokenBalance,
    Subscribing,
    Transferring,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: Step,
    pub result: Result<(), SequenceError>,
}

/// What happened during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceReport {
    pub state: SequenceState,
    pub outcomes: Vec<StepOutcome>,
}

impl SequenceReport {
    pub fn is_complete(&self) -> bool {
        self.state == SequenceState::Complete
    }

    pub fn steps(&self) -> Vec<Step> {
        self.outcomes.iter().map(|o| o.step).collect()
    }

    pub fn error(&self, step: Step) -> Option<&SequenceError> {
        self.outcomes
            .iter()
            .find(|o| o.step == step)
            .and_then(|o| o.result.as_ref().err())
    }

    fn record<T>(
        &mut self,
        step: Step,
        result: Result<T, SequenceError>,
    ) -> Result<T, SequenceError> {
        self.outcomes.push(StepOutcome {
            step,
            result: result.as_ref().map(|_| ()).map_err(Clone::clone),
        });
        result
    }
}

// Values the fault-tolerant steps need from the preconditions.
struct Prepared {
    account: Account,
    binding: Box<dyn ContractBinding>,
    transfer_to: String,
    transfer_amount: U256,
}

pub struct ActionSequencer<O = OutputLog> {
    config: SequencerConfig,
    wallet: Option<Arc<dyn WalletProvider>>,
    chain: Arc<dyn ChainClient>,
    loader: Arc<dyn DescriptorLoader>,
    diagnostics: DiagnosticChannel,
    output: O,
    state: SequenceState,
    account: Option<Account>,
    descriptor: Option<ContractDescriptor>,
    binding: Option<Box<dyn ContractBinding>>,
    subscription: Option<SubscriptionHandle>,
}

impl ActionSequencer<OutputLog> {
    pub fn new(
        config: SequencerConfig,
        chain: Arc<dyn ChainClient>,
        loader: Arc<dyn DescriptorLoader>,
    ) -> Self {
        Self::with_output(config, chain, loader, OutputLog::new())
    }
}

impl<O: OutputSink> ActionSequencer<O> {
    pub fn with_output(
        config: SequencerConfig,
        chain: Arc<dyn ChainClient>,
        loader: Arc<dyn DescriptorLoader>,
        output: O,
    ) -> Self {
        Self {
            config,
            wallet: None,
            chain,
            loader,
            diagnostics: DiagnosticChannel::default(),
            output,
            state: SequenceState::Idle,
            account: None,
            descriptor: None,
            binding: None,
            subscription: None,
        }
    }

    /// Wallet detected in the environment. Without one the sequence stops
    /// at the provider check.
    pub fn with_wallet(mut self, wallet: Arc<dyn WalletProvider>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticChannel) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn descriptor(&self) -> Option<&ContractDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn binding(&self) -> Option<&dyn ContractBinding> {
        self.binding.as_deref()
    }

    pub fn subscription(&self) -> Option<&SubscriptionHandle> {
        self.subscription.as_ref()
    }

    /// Cancels the event listener of the last run, if any.
    pub async fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            info!(event = subscription.event(), "unsubscribing");
            subscription.unsubscribe().await;
        }
    }

    /// Runs the whole sequence.
    ///
    /// Precondition failures abort the run after a single output line. Once
    /// the contract is bound every step runs, whether or not the previous
    /// one failed.
    pub async fn run(&mut self) -> SequenceReport {
        let mut report = SequenceReport::default();

        // A new run must not leave the previous listener behind.
        self.unsubscribe().await;
        self.account = None;
        self.descriptor = None;
        self.binding = None;

        let prepared = match self.prepare(&mut report).await {
            Ok(prepared) => prepared,
            Err(e) => {
                // Every precondition records its outcome before failing.
                let step = report
                    .outcomes
                    .last()
                    .map_or(Step::RequireConfiguration, |o| o.step);
                self.report_failure(step, &e);
                self.enter(SequenceState::Aborted);
                report.state = self.state;
                return report;
            }
        };

        self.enter(SequenceState::ReadingNativeBalance);
        let result = self.read_native_balance(&prepared).await;
        self.recover(&mut report, Step::ReadNativeBalance, result);

        self.enter(SequenceState::ReadingTokenBalance);
        let result = self.read_token_balance(&prepared).await;
        self.recover(&mut report, Step::ReadTokenBalance, result);

        self.enter(SequenceState::Subscribing);
        match report.record(Step::Subscribe, self.subscribe(&prepared).await) {
            Ok(subscription) => self.subscription = Some(subscription),
            // Listener problems never reach the output.
            Err(e) => self.diagnostics.emit(Diagnostic::Error(e.to_string())),
        }

        self.enter(SequenceState::Transferring);
        let result = self.transfer(&prepared).await;
        self.recover(&mut report, Step::Transfer, result);

        self.account = Some(prepared.account);
        self.binding = Some(prepared.binding);

        self.enter(SequenceState::Complete);
        report.state = self.state;
        report
    }

    async fn prepare(&mut self, report: &mut SequenceReport) -> Result<Prepared, SequenceError> {
        self.enter(SequenceState::Configuring);
        let transfer_amount =
            report.record(Step::RequireConfiguration, self.require_configuration())?;
        let wallet = report.record(Step::RequireProvider, self.require_provider())?;

        self.enter(SequenceState::Connecting);
        let account = report.record(Step::Connect, self.connect(wallet.as_ref()).await)?;

        self.enter(SequenceState::DescriptorLoading);
        let descriptor = report.record(Step::LoadDescriptor, self.load_descriptor().await)?;
        let binding = report.record(Step::BindContract, self.bind_contract(&descriptor))?;
        self.descriptor = Some(descriptor);
        self.enter(SequenceState::Bound);

        Ok(Prepared {
            account,
            binding,
            transfer_to: self.config.transfer_target().to_string(),
            transfer_amount,
        })
    }

    fn require_configuration(&self) -> Result<U256, SequenceError> {
        if !self.config.is_complete() {
            return Err(SequenceError::Configuration(CONFIGURATION_MESSAGE.to_string()));
        }

        self.chain
            .to_base_unit(&self.config.transfer_amount)
            .map_err(|e| SequenceError::Configuration(e.to_string()))
    }

    fn require_provider(&self) -> Result<Arc<dyn WalletProvider>, SequenceError> {
        self.wallet.clone().ok_or_else(|| {
            SequenceError::ProviderUnavailable(PROVIDER_UNAVAILABLE_MESSAGE.to_string())
        })
    }

    async fn connect(&mut self, wallet: &dyn WalletProvider) -> Result<Account, SequenceError> {
        let accounts = wallet
            .request_accounts()
            .await
            .map_err(|e| SequenceError::Connect(root_message(&e)))?;

        let account = accounts.into_iter().next().ok_or_else(|| {
            SequenceError::Connect("No account returned by the wallet provider".to_string())
        })?;

        info!(%account, "wallet connected");
        self.emit(format!("Connected account: {}", readable_address(account.as_str())));

        Ok(account)
    }

    async fn load_descriptor(&self) -> Result<ContractDescriptor, SequenceError> {
        let path = &self.config.descriptor_path;

        let document = self
            .loader
            .load(path)
            .await
            .map_err(|e| SequenceError::DescriptorLoad(format!("{:#}", e)))?;

        let descriptor = ContractDescriptor::from_json(&self.config.contract_address, &document)
            .map_err(|e| SequenceError::DescriptorLoad(format!("{:#}", e)))?;

        debug!(path, capabilities = ?descriptor.capabilities(), "descriptor loaded");
        Ok(descriptor)
    }

    fn bind_contract(
        &self,
        descriptor: &ContractDescriptor,
    ) -> Result<Box<dyn ContractBinding>, SequenceError> {
        let binding = self
            .chain
            .bind_contract(descriptor, &self.config.contract_address)
            .map_err(|e| SequenceError::Bind(format!("{:#}", e)))?;

        let capabilities = binding.capabilities();
        debug!(
            address = %binding.address(),
            methods = capabilities.methods.len(),
            events = capabilities.events.len(),
            "contract bound"
        );
        Ok(binding)
    }

    async fn read_native_balance(&mut self, prepared: &Prepared) -> Result<(), SequenceError> {
        self.emit("getBalance() requested.".to_string());

        let balance = self
            .chain
            .get_native_balance(&prepared.account)
            .await
            .map_err(|e| SequenceError::NativeBalance(root_message(&e)))?;

        let line = format!(
            "Account {} has {} currency",
            readable_address(prepared.account.as_str()),
            self.chain.to_display_unit(balance)
        );
        self.emit(line);

        Ok(())
    }

    async fn read_token_balance(&mut self, prepared: &Prepared) -> Result<(), SequenceError> {
        self.emit(format!("{}() called.", BALANCE_OF_METHOD));

        let result = prepared
            .binding
            .call(BALANCE_OF_METHOD, &[Token::from(&prepared.account)])
            .await
            .map_err(|e| SequenceError::Call(root_message(&e)))?;

        let Some(balance) = result.clone().into_uint() else {
            return Err(SequenceError::Call(format!(
                "{} returned a non-integer value: {}",
                BALANCE_OF_METHOD, result
            )));
        };

        let line = format!(
            "Account {} has {} tokens.",
            readable_address(prepared.account.as_str()),
            self.chain.to_display_unit(balance)
        );
        self.emit(line);

        Ok(())
    }

    async fn subscribe(&self, prepared: &Prepared) -> Result<SubscriptionHandle, SequenceError> {
        let filter = EventFilter::new(vec![
            Some(Token::from(&prepared.account)),
            Some(Token::Address(prepared.transfer_to.clone())),
            Some(Token::Uint(prepared.transfer_amount)),
        ]);

        let stream = prepared
            .binding
            .subscribe_event(TRANSFER_EVENT, filter)
            .await
            .map_err(|e| SequenceError::Subscription(root_message(&e)))?;

        info!(event = TRANSFER_EVENT, "listening for events");

        Ok(SubscriptionHandle::spawn(
            TRANSFER_EVENT,
            stream,
            self.diagnostics.clone(),
        ))
    }

    async fn transfer(&mut self, prepared: &Prepared) -> Result<(), SequenceError> {
        self.emit(format!("{}() sent.", TRANSFER_METHOD));

        let args = [
            Token::Address(prepared.transfer_to.clone()),
            Token::Uint(prepared.transfer_amount),
        ];
        let options = SendOptions {
            from: prepared.account.clone(),
        };

        let receipt = prepared
            .binding
            .send(TRANSFER_METHOD, &args, options)
            .await
            .map_err(|e| SequenceError::Send(root_message(&e)))?;

        info!(hash = %receipt.transaction_hash, status = receipt.status, "transfer mined");
        self.emit(format!("Result: {}", receipt.status));

        Ok(())
    }

    fn recover(
        &mut self,
        report: &mut SequenceReport,
        step: Step,
        result: Result<(), SequenceError>,
    ) {
        if let Err(e) = report.record(step, result) {
            self.report_failure(step, &e);
        }
    }

    fn report_failure(&mut self, step: Step, e: &SequenceError) {
        if e.is_fatal() {
            error!(?step, error = %e, "sequence aborted");
        } else {
            warn!(?step, error = %e, "step failed, continuing");
        }
        self.emit(e.output_line());
    }

    fn enter(&mut self, state: SequenceState) {
        debug!(from = ?self.state, to = ?state, "sequence state");
        self.state = state;
    }

    fn emit(&mut self, line: String) {
        self.output.push(line);
    }
}

/// One page session. Triggers are serialized: a trigger arriving while a
/// run is in flight fails with [`SequenceError::AlreadyRunning`].
pub struct Session<O = OutputLog> {
    sequencer: Arc<Mutex<ActionSequencer<O>>>,
    running: Arc<AtomicBool>,
}

impl<O> Clone for Session<O> {
    fn clone(&self) -> Self {
        Self {
            sequencer: self.sequencer.clone(),
            running: self.running.clone(),
        }
    }
}

// Clears the running flag when the run ends, even if its future is dropped.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<O: OutputSink> Session<O> {
    pub fn new(sequencer: ActionSequencer<O>) -> Self {
        Self {
            sequencer: Arc::new(Mutex::new(sequencer)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn trigger(&self) -> Result<SequenceReport, SequenceError> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("trigger ignored, a sequence is already running");
            return Err(SequenceError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        // Waits for `inspect` or `teardown` callers, never for another run.
        let mut sequencer = self.sequencer.lock().await;
        Ok(sequencer.run().await)
    }

    /// Gives access to the sequencer between runs.
    pub async fn inspect<R>(&self, f: impl FnOnce(&ActionSequencer<O>) -> R) -> R {
        let sequencer = self.sequencer.lock().await;
        f(&*sequencer)
    }

    /// Ends the session, cancelling its event listener.
    pub async fn teardown(&self) {
        self.sequencer.lock().await.unsubscribe().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use futures::stream;
    use tokio::{
        sync::{Notify, mpsc},
        time::timeout,
    };

    use super::*;
    use crate::{
        client::{
            EventStream, MockChainClient, MockContractBinding, MockWalletProvider,
            loader::{MockDescriptorLoader, SourceLoader},
            local_chain::{LocalChain, LocalWallet},
        },
        helpers::units,
        types::{TransactionReceipt, descriptor::tests::TOKEN_DESCRIPTOR, event::EventLog},
    };

    const CONTRACT: &str = "0xC0FFEE0000000000000000000000000000000001";
    const ACCOUNT: &str = "0xABCDEF1234567890";

    fn config() -> SequencerConfig {
        SequencerConfig::new(CONTRACT, "./sampleAbi.json")
    }

    fn wallet_with(accounts: &[&str]) -> Arc<MockWalletProvider> {
        let accounts: Vec<Account> = accounts.iter().map(|a| Account::new(*a)).collect();
        let mut wallet = MockWalletProvider::new();
        wallet
            .expect_request_accounts()
            .times(1)
            .returning(move || Ok(accounts.clone()));
        Arc::new(wallet)
    }

    fn descriptor_loader() -> Arc<MockDescriptorLoader> {
        let mut loader = MockDescriptorLoader::new();
        loader
            .expect_load()
            .returning(|_| Ok(TOKEN_DESCRIPTOR.to_string()));
        Arc::new(loader)
    }

    // Chain client converting units like the real one and binding `binding`.
    // `bind_contract` logs the binding's address and capabilities.
    fn expect_logged_accessors(binding: &mut MockContractBinding) {
        binding
            .expect_capabilities()
            .returning(crate::types::descriptor::Capabilities::default);
        binding.expect_address().returning(|| CONTRACT.to_string());
    }

    fn chain_with(mut binding: MockContractBinding) -> Arc<MockChainClient> {
        expect_logged_accessors(&mut binding);
        let mut chain = MockChainClient::new();
        chain
            .expect_to_base_unit()
            .returning(|amount| units::to_base_unit(amount));
        chain.expect_to_display_unit().returning(units::to_display_unit);
        chain
            .expect_get_native_balance()
            .returning(|_| units::to_base_unit("2"));
        chain
            .expect_bind_contract()
            .times(1)
            .return_once(move |_, _| Ok(Box::new(binding)));
        Arc::new(chain)
    }

    fn pending_stream() -> EventStream {
        Box::pin(stream::pending())
    }

    fn receipt(status: bool) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: "0x01".to_string(),
            block_number: 1,
            status,
        }
    }

    fn lines(sequencer: &ActionSequencer) -> Vec<String> {
        sequencer.output().lines().to_vec()
    }

    #[tokio::test]
    async fn test_empty_configuration_makes_no_calls() {
        for config in [
            SequencerConfig::new("", "./sampleAbi.json"),
            SequencerConfig::new(CONTRACT, ""),
        ] {
            // Mocks without expectations panic on any call.
            let mut sequencer = ActionSequencer::new(
                config,
                Arc::new(MockChainClient::new()),
                Arc::new(MockDescriptorLoader::new()),
            )
            .with_wallet(Arc::new(MockWalletProvider::new()));

            let report = sequencer.run().await;

            assert_eq!(report.state, SequenceState::Aborted);
            assert_eq!(report.steps(), vec![Step::RequireConfiguration]);
            assert_eq!(lines(&sequencer), vec![CONFIGURATION_MESSAGE.to_string()]);
        }
    }

    #[tokio::test]
    async fn test_missing_provider_aborts() {
        let mut chain = MockChainClient::new();
        chain
            .expect_to_base_unit()
            .returning(|amount| units::to_base_unit(amount));

        let mut sequencer = ActionSequencer::new(
            config(),
            Arc::new(chain),
            Arc::new(MockDescriptorLoader::new()),
        );

        let report = sequencer.run().await;

        assert_eq!(report.state, SequenceState::Aborted);
        assert!(matches!(
            report.error(Step::RequireProvider),
            Some(SequenceError::ProviderUnavailable(_))
        ));
        assert_eq!(
            lines(&sequencer),
            vec![PROVIDER_UNAVAILABLE_MESSAGE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalid_transfer_amount_is_a_configuration_error() {
        let mut chain = MockChainClient::new();
        chain
            .expect_to_base_unit()
            .returning(|amount| units::to_base_unit(amount));

        let mut config = config();
        config.transfer_amount = "lots".to_string();
        let mut sequencer =
            ActionSequencer::new(config, Arc::new(chain), Arc::new(MockDescriptorLoader::new()))
                .with_wallet(Arc::new(MockWalletProvider::new()));

        let report = sequencer.run().await;

        assert_eq!(report.steps(), vec![Step::RequireConfiguration]);
        assert_eq!(lines(&sequencer), vec!["Invalid amount: 'lots'".to_string()]);
    }

    #[tokio::test]
    async fn test_descriptor_failure_aborts_before_binding() {
        let mut chain = MockChainClient::new();
        chain
            .expect_to_base_unit()
            .returning(|amount| units::to_base_unit(amount));
        chain.expect_bind_contract().never();

        let mut loader = MockDescriptorLoader::new();
        loader
            .expect_load()
            .returning(|_| Ok(r#"{ "bytecode": "0x00" }"#.to_string()));

        let mut sequencer = ActionSequencer::new(config(), Arc::new(chain), Arc::new(loader))
            .with_wallet(wallet_with(&[ACCOUNT]));

        let report = sequencer.run().await;

        assert_eq!(report.state, SequenceState::Aborted);
        assert_eq!(
            report.steps(),
            vec![
                Step::RequireConfiguration,
                Step::RequireProvider,
                Step::Connect,
                Step::LoadDescriptor
            ]
        );

        let output = lines(&sequencer);
        assert_eq!(output.len(), 2);
        assert_eq!(output[0], "Connected account: 0xABC...7890");
        assert!(output[1].starts_with(
            "Error: Failed to load contract descriptor: Invalid descriptor document: missing field `abi`"
        ));
        assert!(sequencer.descriptor().is_none());
    }

    #[tokio::test]
    async fn test_wallet_rejection_aborts() {
        let mut chain = MockChainClient::new();
        chain
            .expect_to_base_unit()
            .returning(|amount| units::to_base_unit(amount));

        let mut wallet = MockWalletProvider::new();
        wallet
            .expect_request_accounts()
            .returning(|| Err(anyhow!("User rejected the request.")));

        let mut sequencer = ActionSequencer::new(
            config(),
            Arc::new(chain),
            Arc::new(MockDescriptorLoader::new()),
        )
        .with_wallet(Arc::new(wallet));

        let report = sequencer.run().await;

        assert_eq!(report.state, SequenceState::Aborted);
        assert_eq!(
            lines(&sequencer),
            vec!["Error: Failed to connect wallet: User rejected the request.".to_string()]
        );
        assert!(sequencer.account().is_none());
    }

    #[tokio::test]
    async fn test_no_accounts_aborts() {
        let mut chain = MockChainClient::new();
        chain
            .expect_to_base_unit()
            .returning(|amount| units::to_base_unit(amount));

        let mut sequencer = ActionSequencer::new(
            config(),
            Arc::new(chain),
            Arc::new(MockDescriptorLoader::new()),
        )
        .with_wallet(wallet_with(&[]));

        let report = sequencer.run().await;

        assert!(matches!(report.error(Step::Connect), Some(SequenceError::Connect(_))));
        assert_eq!(sequencer.output().len(), 1);
    }

    #[tokio::test]
    async fn test_full_sequence_with_successful_transfer() {
        let mut binding = MockContractBinding::new();
        binding
            .expect_call()
            .times(1)
            .returning(|_, _| units::to_base_unit("100").map(Token::Uint));
        binding
            .expect_subscribe_event()
            .times(1)
            .returning(|_, _| Ok(pending_stream()));
        binding
            .expect_send()
            .times(1)
            .returning(|_, _, _| Ok(receipt(true)));

        let mut sequencer =
            ActionSequencer::new(config(), chain_with(binding), descriptor_loader())
                .with_wallet(wallet_with(&[ACCOUNT, "0x0000000000000002"]));

        let report = sequencer.run().await;

        assert!(report.is_complete());
        assert!(report.outcomes.iter().all(|o| o.result.is_ok()));
        assert_eq!(
            lines(&sequencer),
            vec![
                "Connected account: 0xABC...7890",
                "getBalance() requested.",
                "Account 0xABC...7890 has 2 currency",
                "balanceOf() called.",
                "Account 0xABC...7890 has 100 tokens.",
                "transfer() sent.",
                "Result: true",
            ]
        );
        assert_eq!(sequencer.output().last(), Some("Result: true"));
        assert_eq!(sequencer.account(), Some(&Account::new(ACCOUNT)));
        assert!(sequencer.subscription().is_some());
    }

    #[tokio::test]
    async fn test_failed_balance_call_does_not_stop_sequence() {
        let mut binding = MockContractBinding::new();
        binding
            .expect_call()
            .returning(|_, _| Err(anyhow!("execution reverted")));
        binding
            .expect_subscribe_event()
            .times(1)
            .returning(|_, _| Ok(pending_stream()));
        binding
            .expect_send()
            .times(1)
            .returning(|_, _, _| Ok(receipt(true)));

        let mut sequencer =
            ActionSequencer::new(config(), chain_with(binding), descriptor_loader())
                .with_wallet(wallet_with(&[ACCOUNT]));

        let report = sequencer.run().await;

        assert!(report.is_complete());
        assert_eq!(
            report.error(Step::ReadTokenBalance),
            Some(&SequenceError::Call("execution reverted".to_string()))
        );
        assert!(report.error(Step::Subscribe).is_none());
        assert!(report.error(Step::Transfer).is_none());

        let output = lines(&sequencer);
        assert_eq!(output[3], "balanceOf() called.");
        assert_eq!(output[4], "Error: execution reverted");
        assert_eq!(output[5], "transfer() sent.");
        assert_eq!(output[6], "Result: true");
    }

    #[tokio::test]
    async fn test_failed_native_balance_does_not_stop_sequence() {
        let mut binding = MockContractBinding::new();
        binding
            .expect_call()
            .times(1)
            .returning(|_, _| units::to_base_unit("3").map(Token::Uint));
        binding
            .expect_subscribe_event()
            .times(1)
            .returning(|_, _| Ok(pending_stream()));
        binding
            .expect_send()
            .times(1)
            .returning(|_, _, _| Ok(receipt(true)));
        expect_logged_accessors(&mut binding);

        let mut chain = MockChainClient::new();
        chain
            .expect_to_base_unit()
            .returning(|amount| units::to_base_unit(amount));
        chain.expect_to_display_unit().returning(units::to_display_unit);
        chain
            .expect_get_native_balance()
            .times(1)
            .returning(|_| Err(anyhow!("header not found")));
        chain
            .expect_bind_contract()
            .return_once(move |_, _| Ok(Box::new(binding)));

        let mut sequencer = ActionSequencer::new(config(), Arc::new(chain), descriptor_loader())
            .with_wallet(wallet_with(&[ACCOUNT]));

        let report = sequencer.run().await;

        assert_eq!(report.state, SequenceState::Complete);
        assert_eq!(
            report.error(Step::ReadNativeBalance),
            Some(&SequenceError::NativeBalance("header not found".to_string()))
        );
        assert_eq!(
            lines(&sequencer),
            vec![
                "Connected account: 0xABC...7890",
                "getBalance() requested.",
                "Error: header not found",
                "balanceOf() called.",
                "Account 0xABC...7890 has 3 tokens.",
                "transfer() sent.",
                "Result: true",
            ]
        );
    }

    #[tokio::test]
    async fn test_bind_failure_aborts() {
        let mut chain = MockChainClient::new();
        chain
            .expect_to_base_unit()
            .returning(|amount| units::to_base_unit(amount));
        chain.expect_get_native_balance().never();
        chain
            .expect_bind_contract()
            .times(1)
            .returning(|_, _| Err(anyhow!("bad address")));

        let mut sequencer = ActionSequencer::new(config(), Arc::new(chain), descriptor_loader())
            .with_wallet(wallet_with(&[ACCOUNT]));

        let report = sequencer.run().await;

        assert_eq!(report.state, SequenceState::Aborted);
        assert_eq!(report.steps().last(), Some(&Step::BindContract));
        assert_eq!(
            report.error(Step::BindContract),
            Some(&SequenceError::Bind("bad address".to_string()))
        );
        assert_eq!(
            lines(&sequencer),
            vec![
                "Connected account: 0xABC...7890",
                "Error: Failed to bind contract: bad address",
            ]
        );
        assert!(sequencer.binding().is_none());
        assert!(sequencer.subscription().is_none());
    }

    #[tokio::test]
    async fn test_non_integer_balance_is_a_call_error() {
        let mut binding = MockContractBinding::new();
        binding
            .expect_call()
            .returning(|_, _| Ok(Token::Bool(true)));
        binding
            .expect_subscribe_event()
            .returning(|_, _| Ok(pending_stream()));
        binding
            .expect_send()
            .returning(|_, _, _| Ok(receipt(true)));

        let mut sequencer =
            ActionSequencer::new(config(), chain_with(binding), descriptor_loader())
                .with_wallet(wallet_with(&[ACCOUNT]));

        sequencer.run().await;

        let expected = "Error: balanceOf returned a non-integer value: true".to_string();
        assert!(lines(&sequencer).contains(&expected));
    }

    #[tokio::test]
    async fn test_failed_transfer_is_reported() {
        let mut binding = MockContractBinding::new();
        binding
            .expect_call()
            .returning(|_, _| Ok(Token::Uint(U256::ZERO)));
        binding
            .expect_subscribe_event()
            .returning(|_, _| Ok(pending_stream()));
        binding
            .expect_send()
            .returning(|_, _, _| Err(anyhow!("insufficient funds for gas")));

        let mut sequencer =
            ActionSequencer::new(config(), chain_with(binding), descriptor_loader())
                .with_wallet(wallet_with(&[ACCOUNT]));

        let report = sequencer.run().await;

        assert!(report.is_complete());
        assert_eq!(sequencer.output().last(), Some("Error: insufficient funds for gas"));
    }

    #[tokio::test]
    async fn test_subscription_error_goes_to_diagnostics_only() {
        let mut binding = MockContractBinding::new();
        binding
            .expect_call()
            .returning(|_, _| Ok(Token::Uint(U256::ZERO)));
        binding
            .expect_subscribe_event()
            .returning(|_, _| Err(anyhow!("filter not supported")));
        binding
            .expect_send()
            .times(1)
            .returning(|_, _, _| Ok(receipt(false)));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sequencer =
            ActionSequencer::new(config(), chain_with(binding), descriptor_loader())
                .with_wallet(wallet_with(&[ACCOUNT]))
                .with_diagnostics(DiagnosticChannel::new(tx));

        let report = sequencer.run().await;

        assert!(report.is_complete());
        assert!(sequencer.subscription().is_none());
        assert_eq!(
            rx.recv().await,
            Some(Diagnostic::Error("filter not supported".to_string()))
        );

        let output = lines(&sequencer);
        assert!(output.iter().all(|line| !line.contains("filter not supported")));
        assert_eq!(output.last().map(String::as_str), Some("Result: false"));
    }

    // Wallet that blocks until released, to hold a run in flight.
    struct GatedWallet {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl WalletProvider for GatedWallet {
        async fn request_accounts(&self) -> anyhow::Result<Vec<Account>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![Account::new(ACCOUNT)])
        }
    }

    #[tokio::test]
    async fn test_second_trigger_is_refused_while_running() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let mut chain = MockChainClient::new();
        chain
            .expect_to_base_unit()
            .returning(|amount| units::to_base_unit(amount));
        let mut loader = MockDescriptorLoader::new();
        loader
            .expect_load()
            .returning(|_| Err(anyhow!("connection refused")));

        let wallet = GatedWallet {
            entered: entered.clone(),
            release: release.clone(),
        };
        let session = Session::new(
            ActionSequencer::new(config(), Arc::new(chain), Arc::new(loader))
                .with_wallet(Arc::new(wallet)),
        );

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.trigger().await })
        };

        entered.notified().await;
        assert!(matches!(
            session.trigger().await,
            Err(SequenceError::AlreadyRunning)
        ));

        release.notify_one();
        let report = first.await.unwrap().unwrap();
        assert_eq!(report.state, SequenceState::Aborted);

        // Only the first run wrote to the output.
        let output = session.inspect(|s| s.output().lines().to_vec()).await;
        assert_eq!(
            output,
            vec![
                "Connected account: 0xABC...7890".to_string(),
                "Error: Failed to load contract descriptor: connection refused".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_trigger_waits_for_inspection_instead_of_refusing() {
        let session = Session::new(ActionSequencer::new(
            SequencerConfig::default(),
            Arc::new(MockChainClient::new()),
            Arc::new(MockDescriptorLoader::new()),
        ));

        // Hold the sequencer the way a long `inspect` or `teardown` would.
        let held = session.sequencer.lock().await;
        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.trigger().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        drop(held);
        let report = pending.await.unwrap().unwrap();
        assert_eq!(report.state, SequenceState::Aborted);

        // The flag is cleared once the run is over.
        assert!(session.trigger().await.is_ok());
    }

    const HOLDER: &str = "0x5B38Da6a701c568545dCfcdDFcE3b64cBc1B4c9A";

    async fn local_session(
        descriptor: &tempfile::NamedTempFile,
    ) -> (LocalChain, Session, mpsc::UnboundedReceiver<Diagnostic>) {
        let chain = LocalChain::new();
        let holder = Account::new(HOLDER);
        chain.fund(&holder, units::to_base_unit("5").unwrap()).await.unwrap();
        chain
            .deploy_token(CONTRACT, &holder, units::to_base_unit("100").unwrap())
            .await;

        let config = SequencerConfig::new(CONTRACT, descriptor.path().to_str().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();

        let sequencer =
            ActionSequencer::new(config, Arc::new(chain.clone()), Arc::new(SourceLoader::new()))
                .with_wallet(Arc::new(LocalWallet::new(vec![holder])))
                .with_diagnostics(DiagnosticChannel::new(tx));

        (chain, Session::new(sequencer), rx)
    }

    fn descriptor_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), TOKEN_DESCRIPTOR).unwrap();
        file
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Diagnostic>) -> EventLog {
        match timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(Diagnostic::Event(log))) => log,
            other => panic!("expected an event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_chain_sequence() {
        let file = descriptor_file();
        let (chain, session, mut rx) = local_session(&file).await;

        let report = session.trigger().await.unwrap();

        assert!(report.is_complete());
        let output = session.inspect(|s| s.output().lines().to_vec()).await;
        assert_eq!(
            output,
            vec![
                "Connected account: 0x5B3...4c9A",
                "getBalance() requested.",
                "Account 0x5B3...4c9A has 5 currency",
                "balanceOf() called.",
                "Account 0x5B3...4c9A has 100 tokens.",
                "transfer() sent.",
                "Result: true",
            ]
        );

        // The transfer sent by the sequence is seen by its own listener.
        let log = next_event(&mut rx).await;
        assert_eq!(log.values[0], Token::Address(HOLDER.to_string()));
        assert_eq!(log.values[1], Token::Address(CONTRACT.to_string()));
        assert_eq!(
            chain.token_balance(CONTRACT, HOLDER).await,
            units::to_base_unit("99").unwrap()
        );
    }

    #[tokio::test]
    async fn test_subscription_outlives_sequence() {
        let file = descriptor_file();
        let (chain, session, mut rx) = local_session(&file).await;

        let report = session.trigger().await.unwrap();
        assert_eq!(report.state, SequenceState::Complete);
        next_event(&mut rx).await;

        // A matching transfer long after the run completed.
        let receipt = chain
            .transfer_tokens(
                CONTRACT,
                &Account::new(HOLDER),
                CONTRACT,
                units::to_base_unit("1").unwrap(),
            )
            .await
            .unwrap();

        let log = next_event(&mut rx).await;
        assert_eq!(log.transaction_hash, receipt.transaction_hash);
        assert_eq!(session.inspect(|s| s.subscription().map(|h| h.received())).await, Some(2));

        // A transfer with another amount does not match the filter.
        chain
            .transfer_tokens(
                CONTRACT,
                &Account::new(HOLDER),
                CONTRACT,
                units::to_base_unit("2").unwrap(),
            )
            .await
            .unwrap();
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

        session.teardown().await;
        assert!(session.inspect(|s| s.subscription().is_none()).await);
    }

    #[tokio::test]
    async fn test_rerun_replaces_previous_listener() {
        let file = descriptor_file();
        let (chain, session, mut rx) = local_session(&file).await;

        session.trigger().await.unwrap();
        next_event(&mut rx).await;
        session.trigger().await.unwrap();
        next_event(&mut rx).await;

        // Output is appended across runs.
        assert_eq!(session.inspect(|s| s.output().len()).await, 14);

        chain
            .transfer_tokens(
                CONTRACT,
                &Account::new(HOLDER),
                CONTRACT,
                units::to_base_unit("1").unwrap(),
            )
            .await
            .unwrap();

        // One listener left, so the event arrives once.
        next_event(&mut rx).await;
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }
}
