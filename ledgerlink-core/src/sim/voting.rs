//! Voting smart contract
//!
//! Voters are keyed by their client id, vote items by a numeric id. Voting
//! and marking the voter as having voted are two separate transactions:
//! `Vote` only increments the item, `UpdateVoter` records the choice.

use serde::{Deserialize, Serialize};

use super::chaincode::{Chaincode, ChaincodeStub};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(default)]
    pub vote_choice: String,
    #[serde(default)]
    pub voted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub votesnum: u64,
}

#[derive(Debug, Serialize)]
struct ItemRecord {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Record")]
    record: VoteItem,
}

#[derive(Debug, Serialize)]
struct VoterRecord {
    #[serde(rename = "KeyVoter")]
    key: String,
    #[serde(rename = "Record")]
    record: Voter,
}

/// Voting contract; seeds three items unless created with [`VotingChaincode::empty`]
#[derive(Debug, Clone)]
pub struct VotingChaincode {
    seed_items: Vec<VoteItem>,
}

impl Default for VotingChaincode {
    fn default() -> Self {
        Self {
            seed_items: vec![
                VoteItem {
                    name: "Choice1".to_string(),
                    votesnum: 0,
                },
                VoteItem {
                    name: "Choice2".to_string(),
                    votesnum: 6,
                },
                VoteItem {
                    name: "Choice3".to_string(),
                    votesnum: 30,
                },
            ],
        }
    }
}

impl VotingChaincode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contract deployed without any vote items
    pub fn empty() -> Self {
        Self {
            seed_items: Vec::new(),
        }
    }

    fn init_ledger(&self, stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, String> {
        for (id, item) in self.seed_items.iter().enumerate() {
            stub.put_state(&id.to_string(), to_json(item)?);
        }
        Ok(Vec::new())
    }

    fn query_voter(stub: &mut ChaincodeStub<'_>, id: &str) -> Result<Voter, String> {
        let bytes = stub
            .get_state(id)
            .ok_or_else(|| format!("{} does not exist", id))?;
        Ok(serde_json::from_slice(&bytes).unwrap_or_default())
    }

    fn query_item(stub: &mut ChaincodeStub<'_>, id: &str) -> Result<VoteItem, String> {
        let bytes = stub
            .get_state(id)
            .ok_or_else(|| format!("{} does not exist", id))?;
        Ok(serde_json::from_slice(&bytes).unwrap_or_default())
    }

    fn create_voter(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, String> {
        let client_id = match stub.client_id() {
            Ok(id) => id,
            Err(_) => return Ok(b"Failed to get user's ID".to_vec()),
        };
        if Self::query_voter(stub, &client_id).is_ok() {
            return Ok(b"You have registered as a voter already!".to_vec());
        }
        let voter = Voter {
            vote_choice: "none".to_string(),
            voted: false,
        };
        stub.put_state(&client_id, to_json(&voter)?);
        Ok(b"CreateVoter ok".to_vec())
    }

    fn vote(stub: &mut ChaincodeStub<'_>, item_id: &str) -> Result<Vec<u8>, String> {
        let client_id = match stub.client_id() {
            Ok(id) => id,
            Err(_) => return Ok(b"Failed to get user's ID".to_vec()),
        };
        let voter = match Self::query_voter(stub, &client_id) {
            Ok(voter) => voter,
            Err(_) => return Ok(b"Voter does not exist! Register as a voter first!".to_vec()),
        };
        let mut item = match Self::query_item(stub, item_id) {
            Ok(item) => item,
            Err(_) => return Ok(b"Item does not exist! Check the item's ID again!".to_vec()),
        };
        if voter.voted {
            return Ok(b"You have voted already!".to_vec());
        }
        item.votesnum += 1;
        stub.put_state(item_id, to_json(&item)?);
        Ok(b"Voted successfully".to_vec())
    }

    fn update_voter(stub: &mut ChaincodeStub<'_>, item_id: &str) -> Result<Vec<u8>, String> {
        let client_id = stub.client_id()?;
        let mut voter = match Self::query_voter(stub, &client_id) {
            Ok(voter) => voter,
            Err(_) => return Ok(b"err".to_vec()),
        };
        voter.voted = true;
        voter.vote_choice = item_id.to_string();
        stub.put_state(&client_id, to_json(&voter)?);
        Ok(b"UpdateVoter successful".to_vec())
    }

    fn query_all_items(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, String> {
        let records: Vec<ItemRecord> = stub
            .get_state_by_range("", "")
            .into_iter()
            .filter_map(|(key, value)| {
                let item: VoteItem = serde_json::from_slice(&value).ok()?;
                (!item.name.is_empty()).then_some(ItemRecord { key, record: item })
            })
            .collect();
        if records.is_empty() {
            return Ok(Vec::new());
        }
        to_json(&records)
    }

    fn query_all_users(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, String> {
        let records: Vec<VoterRecord> = stub
            .get_state_by_range("", "")
            .into_iter()
            .filter_map(|(key, value)| {
                let voter: Voter = serde_json::from_slice(&value).ok()?;
                (!voter.vote_choice.is_empty()).then_some(VoterRecord { key, record: voter })
            })
            .collect();
        if records.is_empty() {
            return Ok(Vec::new());
        }
        to_json(&records)
    }
}

impl Chaincode for VotingChaincode {
    fn init(&self, stub: &mut ChaincodeStub<'_>) -> Result<(), String> {
        self.init_ledger(stub).map(|_| ())
    }

    fn invoke(
        &self,
        stub: &mut ChaincodeStub<'_>,
        function: &str,
        args: &[String],
    ) -> Result<Vec<u8>, String> {
        match function {
            "InitLedger" => self.init_ledger(stub),
            "CreateVoter" => Self::create_voter(stub),
            "Vote" => Self::vote(stub, single_arg(function, args)?),
            "UpdateVoter" => Self::update_voter(stub, single_arg(function, args)?),
            "QueryItem" => to_json(&Self::query_item(stub, single_arg(function, args)?)?),
            "QueryVoter" => to_json(&Self::query_voter(stub, single_arg(function, args)?)?),
            "QueryAllItems" => Self::query_all_items(stub),
            "QueryAllUsers" => Self::query_all_users(stub),
            other => Err(format!("Function {} not found in contract SmartContract", other)),
        }
    }
}

fn single_arg<'a>(function: &str, args: &'a [String]) -> Result<&'a str, String> {
    match args {
        [arg] => Ok(arg.as_str()),
        _ => Err(format!(
            "Incorrect number of params. Expected 1, received {} for {}",
            args.len(),
            function
        )),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
    serde_json::to_vec(value).map_err(|e| format!("failed to marshal: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Creator;
    use crate::sim::chaincode::{VersionedValue, WorldState};
    use crate::test_utils::sample_identity;

    fn apply(state: &mut WorldState, creator: &Creator, function: &str, args: &[&str]) -> String {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let (result, rwset) = {
            let mut stub = ChaincodeStub::new(state, creator, "tx");
            let result = VotingChaincode::new().invoke(&mut stub, function, &args);
            (result, stub.into_rwset())
        };
        for write in rwset.writes {
            match write.value {
                Some(value) => {
                    state.insert(write.key, VersionedValue { value, version: 1 });
                }
                None => {
                    state.remove(&write.key);
                }
            }
        }
        match result {
            Ok(bytes) => String::from_utf8(bytes).unwrap(),
            Err(e) => format!("ERR: {}", e),
        }
    }

    fn seeded() -> WorldState {
        let mut state = WorldState::new();
        let creator = sample_identity("admin").creator();
        apply(&mut state, &creator, "InitLedger", &[]);
        state
    }

    #[test]
    fn test_vote_flow() {
        let mut state = seeded();
        let creator = sample_identity("appUser").creator();

        assert_eq!(
            apply(&mut state, &creator, "Vote", &["1"]),
            "Voter does not exist! Register as a voter first!"
        );
        assert_eq!(apply(&mut state, &creator, "CreateVoter", &[]), "CreateVoter ok");
        assert_eq!(
            apply(&mut state, &creator, "CreateVoter", &[]),
            "You have registered as a voter already!"
        );
        assert_eq!(
            apply(&mut state, &creator, "Vote", &["9"]),
            "Item does not exist! Check the item's ID again!"
        );
        assert_eq!(apply(&mut state, &creator, "Vote", &["1"]), "Voted successfully");
        assert_eq!(
            apply(&mut state, &creator, "UpdateVoter", &["1"]),
            "UpdateVoter successful"
        );
        assert_eq!(apply(&mut state, &creator, "Vote", &["1"]), "You have voted already!");

        let item = apply(&mut state, &creator, "QueryItem", &["1"]);
        assert_eq!(item, r#"{"name":"Choice2","votesnum":7}"#);
    }

    #[test]
    fn test_query_all_items_skips_voters() {
        let mut state = seeded();
        let creator = sample_identity("appUser").creator();
        apply(&mut state, &creator, "CreateVoter", &[]);

        let all: serde_json::Value =
            serde_json::from_str(&apply(&mut state, &creator, "QueryAllItems", &[])).unwrap();
        let items = all.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[2]["Key"], "2");
        assert_eq!(items[2]["Record"]["votesnum"], 30);

        let users: serde_json::Value =
            serde_json::from_str(&apply(&mut state, &creator, "QueryAllUsers", &[])).unwrap();
        assert_eq!(users.as_array().unwrap().len(), 1);
        assert_eq!(users[0]["Record"]["vote_choice"], "none");
    }

    #[test]
    fn test_query_all_items_on_empty_state_is_empty() {
        let mut state = WorldState::new();
        let creator = sample_identity("appUser").creator();
        assert_eq!(apply(&mut state, &creator, "QueryAllItems", &[]), "");
    }

    #[test]
    fn test_application_errors() {
        let mut state = seeded();
        let creator = sample_identity("appUser").creator();

        assert_eq!(
            apply(&mut state, &creator, "QueryItem", &["7"]),
            "ERR: 7 does not exist"
        );
        assert!(apply(&mut state, &creator, "Vote", &[]).starts_with("ERR: Incorrect number"));
        assert_eq!(
            apply(&mut state, &creator, "Delete", &[]),
            "ERR: Function Delete not found in contract SmartContract"
        );
    }
}
