use std::collections::HashMap;

use mauve_core::{ProfileMetadata, Pubkey};

use crate::{Database, DbResult, follower_counts, followers, profiles};

impl Database {
    pub async fn get_followers_of_pubkey(&self, pubkey: &Pubkey) -> DbResult<Vec<Pubkey>> {
        let pubkey = pubkey.clone();
        self.read_with(|tx| {
            let followers_table = tx.open_table(&followers::TABLE)?;

            let mut ret = vec![];
            for entry in followers_table.range(&(pubkey.clone(), Pubkey::default())..)? {
                let (k, _) = entry?;
                let (followee, follower) = k.value();
                if followee != pubkey {
                    break;
                }
                ret.push(follower);
            }
            Ok(ret)
        })
        .await
    }

    pub async fn get_follower_count(&self, pubkey: &Pubkey) -> DbResult<u64> {
        let pubkey = pubkey.clone();
        self.read_with(|tx| {
            let follower_counts_table = tx.open_table(&follower_counts::TABLE)?;
            Ok(follower_counts_table
                .get(&pubkey)?
                .map(|g| g.value())
                .unwrap_or_default())
        })
        .await
    }

    /// All pubkeys with at least `min` followers.
    pub async fn get_follower_counts(&self, min: u64) -> DbResult<HashMap<Pubkey, u64>> {
        self.read_with(|tx| {
            let follower_counts_table = tx.open_table(&follower_counts::TABLE)?;

            let mut ret = HashMap::new();
            for entry in follower_counts_table.range::<Pubkey>(&Pubkey::default()..)? {
                let (k, v) = entry?;
                let count = v.value();
                if min <= count {
                    ret.insert(k.value(), count);
                }
            }
            Ok(ret)
        })
        .await
    }

    /// Follower counts for a specific set of pubkeys, zero-filled.
    pub async fn get_follower_counts_for(
        &self,
        pubkeys: &[Pubkey],
    ) -> DbResult<HashMap<Pubkey, u64>> {
        let pubkeys = pubkeys.to_vec();
        self.read_with(|tx| {
            let follower_counts_table = tx.open_table(&follower_counts::TABLE)?;

            let mut ret = HashMap::new();
            for pubkey in pubkeys {
                let count = follower_counts_table
                    .get(&pubkey)?
                    .map(|g| g.value())
                    .unwrap_or_default();
                ret.insert(pubkey, count);
            }
            Ok(ret)
        })
        .await
    }

    /// Batched profile lookup; pubkeys without a stored profile are absent
    /// from the result.
    pub async fn get_profile_info(
        &self,
        pubkeys: &[Pubkey],
    ) -> DbResult<HashMap<Pubkey, ProfileMetadata>> {
        let pubkeys = pubkeys.to_vec();
        self.read_with(|tx| {
            let profiles_table = tx.open_table(&profiles::TABLE)?;

            let mut ret = HashMap::new();
            for pubkey in pubkeys {
                if let Some(record) = profiles_table.get(&pubkey)?.map(|g| g.value()) {
                    ret.insert(pubkey, record.profile);
                }
            }
            Ok(ret)
        })
        .await
    }

    /// Best display names for the given pubkeys; absent when no profile or
    /// no usable name field.
    pub async fn get_profile_names(&self, pubkeys: &[Pubkey]) -> DbResult<HashMap<Pubkey, String>> {
        Ok(self
            .get_profile_info(pubkeys)
            .await?
            .into_iter()
            .filter_map(|(pubkey, profile)| {
                let name = profile.best_name().to_owned();
                (!name.is_empty()).then_some((pubkey, name))
            })
            .collect())
    }
}
