//! nftables backend: one table `outway`, a set `outway_marks_<iface>`
//! typed `{ ipv4_addr : timeout }`, one rule per interface routing matched
//! packets via `meta mark set <fwmark>`.
//!
//! Uses raw `nftnl`+`mnl` batches sent over a netlink socket, rather than
//! shelling out to `nft`.

#![cfg(target_os = "linux")]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nftnl::expr::{self, Immediate, Register};
use nftnl::{nft_expr, Batch, Chain, ChainType, Hook, MsgType, ProtoFamily, Rule, Set, SetKey, Table};
use parking_lot::Mutex;

use crate::backend::{derive_tunnel_info, validate_mark_input, FirewallBackend, TunnelInfo};
use crate::error::{Error, Result};
use crate::netlink_ops::{NetlinkOps, RealNetlinkOps, RuleSpec};

const TABLE_NAME: &std::ffi::CStr = c"outway";

fn set_name(iface: &str) -> String {
    format!("outway_marks_{iface}")
}

fn chain_name(iface: &str) -> String {
    format!("OUTWAY_{iface}")
}

fn send_batch(batch: &nftnl::FinalizedBatch) -> Result<()> {
    let socket = mnl::Socket::new(mnl::Bus::Netfilter).map_err(|e| Error::BackendFailure(format!("netlink socket: {e}")))?;
    let portid = socket.portid();
    socket.send_all(batch).map_err(|e| Error::BackendFailure(format!("send batch: {e}")))?;

    let mut buffer = vec![0; nftnl::nft_nlmsg_maxsize() as usize];
    let mut expected_seqs = batch.sequence_numbers();
    while !expected_seqs.is_empty() {
        let messages = socket.recv(&mut buffer[..]).map_err(|e| Error::BackendFailure(format!("recv: {e}")))?;
        for message in messages {
            let message = message.map_err(|e| Error::BackendFailure(format!("netlink message: {e}")))?;
            let expected = expected_seqs
                .next()
                .ok_or_else(|| Error::BackendFailure("unexpected ACK from netfilter".into()))?;
            mnl::cb_run(message, expected, portid).map_err(|e| Error::BackendFailure(format!("ACK error: {e}")))?;
        }
    }
    Ok(())
}

fn delete_table(ignore_enoent: bool) -> Result<()> {
    let table = Table::new(TABLE_NAME, ProtoFamily::Ipv4);
    let mut batch = Batch::new();
    batch.add(&table, MsgType::Del);
    match send_batch(&batch.finalize()) {
        Ok(()) => Ok(()),
        Err(e) if ignore_enoent && e.to_string().contains("No such file or directory") => Ok(()),
        Err(e) => Err(e),
    }
}

pub struct NfTablesBackend {
    netlink: Arc<dyn NetlinkOps>,
    tunnels: Mutex<HashMap<String, TunnelInfo>>,
    policies_ensured: Mutex<std::collections::HashSet<String>>,
}

impl NfTablesBackend {
    pub fn new() -> Result<Self> {
        Ok(Self {
            netlink: Arc::new(RealNetlinkOps::new()?),
            tunnels: Mutex::new(HashMap::new()),
            policies_ensured: Mutex::new(std::collections::HashSet::new()),
        })
    }
}

#[async_trait]
impl FirewallBackend for NfTablesBackend {
    async fn initialize_tunnels(&self, ifaces: &[String]) -> Result<HashMap<String, TunnelInfo>> {
        let mut batch = Batch::new();
        let table = Table::new(TABLE_NAME, ProtoFamily::Ipv4);
        batch.add(&table, MsgType::Add);
        send_batch(&batch.finalize())?;

        let mut tunnels = self.tunnels.lock();
        for iface in ifaces {
            let info = *tunnels.entry(iface.clone()).or_insert_with(|| derive_tunnel_info(iface));
            self.netlink
                .rule_add(&RuleSpec {
                    fw_mark: info.fwmark,
                    table_id: info.table_id,
                    priority: info.priority,
                })
                .await?;
        }
        Ok(tunnels.clone())
    }

    async fn ensure_policy(&self, iface: &str) -> Result<()> {
        if self.policies_ensured.lock().contains(iface) {
            return Ok(());
        }
        let fwmark = self
            .tunnels
            .lock()
            .get(iface)
            .map(|t| t.fwmark)
            .ok_or_else(|| Error::UnknownInterface(iface.to_string()))?;

        let table = Table::new(TABLE_NAME, ProtoFamily::Ipv4);
        let mut batch = Batch::new();

        let set_name = set_name(iface);
        let set_cstr = std::ffi::CString::new(set_name.clone()).unwrap();
        let mut set = Set::<IpAddr>::new(&set_cstr, 0, &table, nftnl::set::SetKeyType::ipv4_addr());
        set.set_timeout(Duration::from_secs(0));
        batch.add(&set, MsgType::Add);

        let chain_cstr = std::ffi::CString::new(chain_name(iface)).unwrap();
        let mut chain = Chain::new(&chain_cstr, &table);
        chain.set_hook(Hook::Out, 0);
        chain.set_type(ChainType::Route);
        batch.add(&chain, MsgType::Add);

        let mut rule = Rule::new(&chain);
        rule.add_expr(&nft_expr!(ip daddr));
        rule.add_expr(&expr::LookupKey::new(&set));
        rule.add_expr(&Immediate::new(fwmark, Register::Reg1));
        rule.add_expr(&nft_expr!(meta mark set));
        batch.add(&rule, MsgType::Add);

        send_batch(&batch.finalize())?;
        self.policies_ensured.lock().insert(iface.to_string());
        Ok(())
    }

    async fn mark_ip(&self, iface: &str, ip: IpAddr, ttl: Duration) -> Result<()> {
        validate_mark_input(iface)?;
        self.ensure_policy(iface).await?;

        let table = Table::new(TABLE_NAME, ProtoFamily::Ipv4);
        let set_cstr = std::ffi::CString::new(set_name(iface)).unwrap();
        let set = Set::<IpAddr>::new(&set_cstr, 0, &table, nftnl::set::SetKeyType::ipv4_addr());

        let mut batch = Batch::new();
        let mut elem = nftnl::set::Element::new(&set, ip);
        elem.set_timeout(ttl);
        batch.add(&elem, MsgType::Add);
        send_batch(&batch.finalize())
    }

    async fn flush_runtime(&self) -> Result<()> {
        delete_table(true)?;
        self.policies_ensured.lock().clear();
        Ok(())
    }

    async fn cleanup_all(&self) -> Result<()> {
        self.flush_runtime().await?;
        self.tunnels.lock().clear();
        Ok(())
    }

    async fn get_tunnel_info(&self, iface: &str) -> Option<TunnelInfo> {
        self.tunnels.lock().get(iface).copied()
    }

    fn name(&self) -> &'static str {
        "nftables"
    }
}
